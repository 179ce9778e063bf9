// Chat rooms: every participant both posts and receives.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{Json, Response};
use tracing::{debug, warn};

use opsdeck_core::broker::handshake::CLOSE_INTERNAL_ERROR;
use opsdeck_core::{ChannelId, Hub, Peer, StoredMessage};

use super::ApiError;
use super::socket::{self, TokenQuery};

/// GET /api/chat/ws/{room_id}?token=
pub(super) async fn chat_ws(
    ws: WebSocketUpgrade,
    Path(room_id): Path<u64>,
    Query(query): Query<TokenQuery>,
    State(hub): State<Hub>,
) -> Response {
    ws.on_upgrade(move |socket| chat_session(socket, hub, room_id, query))
}

async fn chat_session(socket: WebSocket, hub: Hub, room_id: u64, query: TokenQuery) {
    let Some((socket, identity)) = socket::identify(socket, &hub, &query).await else {
        return;
    };

    let channel = ChannelId::ChatRoom(room_id);
    let (peer, outbound) = Peer::channel(hub.config().subscriber_buffer);
    let id = peer.id;
    if let Err(e) = hub.broker().register_subscriber(channel, peer).await {
        warn!(room_id, error = %e, "could not join chat room");
        socket::close(socket, CLOSE_INTERNAL_ERROR, "Broker unavailable").await;
        return;
    }
    debug!(room_id, connection_id = %id, user = %identity.username, "joined chat room");

    let chat_hub = hub.clone();
    socket::pump(socket, outbound, hub.child_token(), move |text| {
        let hub = chat_hub.clone();
        let author = identity.clone();
        async move {
            // A bad post is dropped; the participant stays connected.
            if let Err(e) = hub.chat().post_frame(room_id, &author, &text).await {
                warn!(room_id, user = %author.username, error = %e, "chat message dropped");
            }
        }
    })
    .await;

    let _ = hub.broker().unregister_subscriber(channel, id).await;
    debug!(room_id, connection_id = %id, "left chat room");
}

/// GET /api/chat/rooms/{room_id}/messages
pub(super) async fn history(
    Path(room_id): Path<u64>,
    State(hub): State<Hub>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    Ok(Json(hub.chat().history(room_id).await?))
}
