// Shared plumbing for the duplex routes.

use std::future::Future;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use opsdeck_core::broker::handshake::{CLOSE_POLICY_VIOLATION, REASON_INVALID_TOKEN};
use opsdeck_core::{Frame, Hub, Identity};

/// `?token=` on authenticated duplex routes.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

pub(crate) fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }))
}

/// Send a close frame and drop the socket.
pub(crate) async fn close(mut socket: WebSocket, code: u16, reason: &str) {
    if let Err(e) = socket.send(close_message(code, reason)).await {
        debug!(error = %e, "failed to send close frame");
    }
}

/// Verify the caller's token, closing with 1008 if it is missing or bad.
pub(crate) async fn identify(
    socket: WebSocket,
    hub: &Hub,
    query: &TokenQuery,
) -> Option<(WebSocket, Identity)> {
    match query.token.as_deref().and_then(|t| hub.verifier().verify(t)) {
        Some(identity) => Some((socket, identity)),
        None => {
            close(socket, CLOSE_POLICY_VIOLATION, REASON_INVALID_TOKEN).await;
            None
        }
    }
}

/// Next text message, skipping pings. `None` on close or error.
pub(crate) async fn next_text(socket: &mut WebSocket) -> Option<String> {
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Binary(_) | Message::Close(_)) | Err(_) => return None,
        }
    }
    None
}

/// Forward queued frames to the socket and hand inbound text to
/// `on_text`, until the client leaves, the queue closes or `cancel` fires.
///
/// The queue closing means the broker dropped this peer (slow consumer or
/// broker shutdown); the socket is closed in that case too.
pub(crate) async fn pump<F, Fut>(
    socket: WebSocket,
    mut outbound: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
    mut on_text: F,
) where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cancel = cancel.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx
                        .send(close_message(close_code::AWAY, "Server shutting down"))
                        .await;
                    break;
                }
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        let _ = ws_tx.send(close_message(close_code::NORMAL, "")).await;
                        break;
                    };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut writer_done = false;
    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            msg = ws_rx.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => on_text(text.to_string()).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                break;
            }
        }
    }

    if writer_done {
        return;
    }
    if cancel.is_cancelled() {
        // Let the writer send its close frame.
        let _ = writer.await;
    } else {
        writer.abort();
    }
}
