// Live interface traffic for one device, one dedicated connection per viewer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use opsdeck_core::broker::encode_frame;
use opsdeck_core::broker::handshake::CLOSE_INTERNAL_ERROR;
use opsdeck_core::{CoreError, Hub, StreamEnd, TargetId, TrafficMessage};

use super::socket::{self, TokenQuery};

const REASON_CONNECT_FAILED: &str = "Failed to connect to device.";
const REASON_SAMPLING_FAILED: &str = "Lost contact with device.";

/// GET /ws/traffic/{device_id}?token=
pub(super) async fn traffic_ws(
    ws: WebSocketUpgrade,
    Path(device_id): Path<u64>,
    Query(query): Query<TokenQuery>,
    State(hub): State<Hub>,
) -> Response {
    ws.on_upgrade(move |socket| traffic_session(socket, hub, TargetId(device_id), query))
}

async fn traffic_session(socket: WebSocket, hub: Hub, device_id: TargetId, query: TokenQuery) {
    let Some((socket, identity)) = socket::identify(socket, &hub, &query).await else {
        return;
    };

    let target = match hub.load_target(device_id).await {
        Ok(target) => target,
        Err(e) => {
            warn!(target_id = %device_id, error = %e, "traffic stream refused");
            socket::close(socket, CLOSE_INTERNAL_ERROR, REASON_CONNECT_FAILED).await;
            return;
        }
    };
    debug!(target_id = %device_id, user = %identity.username, "traffic viewer connected");

    let (tx, mut rx) = mpsc::channel::<TrafficMessage>(hub.config().subscriber_buffer);
    let poller = hub.poller().clone();
    let cancel = hub.child_token();
    let stream = tokio::spawn(async move { poller.start_stream(&target, tx, cancel).await });

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            message = rx.recv() => {
                // The stream dropped its sender: it has ended one way or another.
                let Some(message) = message else { break };
                let frame = match encode_frame(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode traffic message");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    // Dropping the receiver tells a still-running stream its viewer left.
    drop(rx);
    let (code, reason) = match stream.await {
        Ok(Ok(StreamEnd::Cancelled)) => (close_code::AWAY, ""),
        Ok(Ok(StreamEnd::SubscriberGone)) => (close_code::NORMAL, ""),
        Ok(Err(CoreError::ConnectionFailed { .. } | CoreError::AuthenticationFailed { .. })) => {
            (CLOSE_INTERNAL_ERROR, REASON_CONNECT_FAILED)
        }
        Ok(Err(CoreError::SamplingFailed { .. })) => (CLOSE_INTERNAL_ERROR, REASON_SAMPLING_FAILED),
        Ok(Err(e)) => {
            warn!(target_id = %device_id, error = %e, "traffic stream failed");
            (CLOSE_INTERNAL_ERROR, REASON_SAMPLING_FAILED)
        }
        Err(e) => {
            warn!(target_id = %device_id, error = %e, "traffic stream task failed");
            (CLOSE_INTERNAL_ERROR, REASON_SAMPLING_FAILED)
        }
    };
    let _ = ws_tx.send(socket::close_message(code, reason)).await;
    debug!(target_id = %device_id, "traffic viewer disconnected");
}
