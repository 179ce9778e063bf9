// Discovery routes: one agent produces, admin consoles subscribe.

use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use opsdeck_core::broker::discovery::request_scan;
use opsdeck_core::broker::handshake::{
    AUTH_ACK, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, REASON_AUTH_FAILED,
    REASON_PRODUCER_TAKEN, verify_agent_auth,
};
use opsdeck_core::{ChannelId, Frame, Hub, Peer};

use super::ApiError;
use super::socket::{self, TokenQuery};

/// How long a fresh agent connection gets to send `agent_auth`.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// GET /api/discovery/ws/agent
pub(super) async fn agent_ws(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| agent_session(socket, hub))
}

async fn agent_session(mut socket: WebSocket, hub: Hub) {
    let first = tokio::time::timeout(AUTH_TIMEOUT, socket::next_text(&mut socket))
        .await
        .ok()
        .flatten();

    let authenticated = first
        .as_deref()
        .is_some_and(|text| verify_agent_auth(text, &hub.config().agent_key).is_ok());
    if !authenticated {
        warn!("discovery agent failed authentication");
        socket::close(socket, CLOSE_POLICY_VIOLATION, REASON_AUTH_FAILED).await;
        return;
    }

    let (peer, outbound) = Peer::channel(hub.config().subscriber_buffer);
    let id = peer.id;
    match hub.broker().register_producer(ChannelId::Discovery, peer).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(connection_id = %id, "rejected second discovery agent");
            socket::close(socket, CLOSE_POLICY_VIOLATION, REASON_PRODUCER_TAKEN).await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "could not register discovery agent");
            socket::close(socket, CLOSE_INTERNAL_ERROR, "Broker unavailable").await;
            return;
        }
    }

    if socket
        .send(axum::extract::ws::Message::Text(AUTH_ACK.to_owned().into()))
        .await
        .is_err()
    {
        let _ = hub.broker().unregister_producer(ChannelId::Discovery, id).await;
        return;
    }
    info!(connection_id = %id, "discovery agent connected");

    let relay_hub = hub.clone();
    socket::pump(socket, outbound, hub.child_token(), move |text| {
        let hub = relay_hub.clone();
        async move {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&text) {
                warn!(error = %e, "dropping non-JSON message from agent");
                return;
            }
            match hub
                .broker()
                .relay_from_producer(ChannelId::Discovery, Frame::from(text))
                .await
            {
                Ok(delivered) => debug!(delivered, "relayed discovery event"),
                Err(e) => warn!(error = %e, "discovery relay failed"),
            }
        }
    })
    .await;

    let _ = hub.broker().unregister_producer(ChannelId::Discovery, id).await;
    info!(connection_id = %id, "discovery agent disconnected");
}

/// GET /api/discovery/ws/subscribe?token=
pub(super) async fn subscribe_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    State(hub): State<Hub>,
) -> Response {
    ws.on_upgrade(move |socket| subscriber_session(socket, hub, query))
}

async fn subscriber_session(socket: WebSocket, hub: Hub, query: TokenQuery) {
    let Some((socket, identity)) = socket::identify(socket, &hub, &query).await else {
        return;
    };

    let (peer, outbound) = Peer::channel(hub.config().subscriber_buffer);
    let id = peer.id;
    if let Err(e) = hub.broker().register_subscriber(ChannelId::Discovery, peer).await {
        warn!(error = %e, "could not register discovery subscriber");
        socket::close(socket, CLOSE_INTERNAL_ERROR, "Broker unavailable").await;
        return;
    }
    debug!(connection_id = %id, user = %identity.username, "discovery subscriber joined");

    // Consoles only listen; anything they send is ignored.
    socket::pump(socket, outbound, hub.child_token(), |_text| async {}).await;

    let _ = hub.broker().unregister_subscriber(ChannelId::Discovery, id).await;
    debug!(connection_id = %id, "discovery subscriber left");
}

#[derive(Debug, Deserialize)]
pub(super) struct ScanRequest {
    target: String,
}

/// POST /api/discovery/scan/{kind}
pub(super) async fn scan(
    Path(kind): Path<String>,
    State(hub): State<Hub>,
    Json(request): Json<ScanRequest>,
) -> Result<Response, ApiError> {
    request_scan(hub.broker(), &kind, &request.target).await?;
    info!(kind = %kind, target = %request.target, "scan requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "scan_requested", "kind": kind, "target": request.target })),
    )
        .into_response())
}
