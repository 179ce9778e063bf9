//! Producer side of the discovery channel, with auto-reconnect.
//!
//! A discovery agent connects to the server's agent endpoint, proves
//! itself with an `agent_auth` message, then streams events upstream and
//! receives commands downstream. The link survives server restarts:
//! outbound events queue in a bounded channel while disconnected and the
//! connection is retried with exponential backoff + jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use opsdeck_api::agent_link::{ProducerLink, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = url::Url::parse("ws://127.0.0.1:8080/api/discovery/ws/agent")?;
//! let link = ProducerLink::spawn(url, key, ReconnectConfig::default(), CancellationToken::new());
//! let mut commands = link.subscribe();
//!
//! link.send(serde_json::json!({ "type": "scan_status", "data": "started" })).await?;
//! while let Ok(cmd) = commands.recv().await {
//!     println!("{cmd}");
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Channel capacities ───────────────────────────────────────────────

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// How long the server gets to acknowledge `agent_auth`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close reason the server sends when the agent key does not match.
pub const REASON_AUTH_FAILED: &str = "Authentication failed";

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for link reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── ProducerLink ─────────────────────────────────────────────────────

/// Handle to a running producer link.
///
/// Dropping the handle does not stop the background task; call
/// [`shutdown`](Self::shutdown) or cancel the token passed to
/// [`spawn`](Self::spawn).
pub struct ProducerLink {
    outbound_tx: mpsc::Sender<Value>,
    command_rx: broadcast::Receiver<Arc<Value>>,
    cancel: CancellationToken,
}

impl ProducerLink {
    /// Spawn the connection loop. Returns immediately; the first
    /// connection attempt happens in the background.
    pub fn spawn(
        url: Url,
        key: SecretString,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = broadcast::channel(COMMAND_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            link_loop(url, key, outbound_rx, command_tx, reconnect, task_cancel).await;
        });

        Self {
            outbound_tx,
            command_rx,
            cancel,
        }
    }

    /// Queue an event for the server. Waits while the queue is full.
    pub async fn send(&self, event: Value) -> Result<(), Error> {
        self.outbound_tx
            .send(event)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// A sender usable from other tasks.
    pub fn sender(&self) -> mpsc::Sender<Value> {
        self.outbound_tx.clone()
    }

    /// Get a new receiver for commands pushed by the server.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Value>> {
        self.command_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// How a single connection ended without error.
enum SessionEnd {
    /// Server closed or the stream ended; reconnect.
    Disconnected,
    /// Cancelled or every outbound sender dropped; stop for good.
    Finished,
}

/// Main loop: connect → authenticate → serve → on error, backoff → reconnect.
async fn link_loop(
    url: Url,
    key: SecretString,
    mut outbound_rx: mpsc::Receiver<Value>,
    command_tx: broadcast::Sender<Arc<Value>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_serve(&url, &key, &mut outbound_rx, &command_tx, &cancel) => result,
        };

        match result {
            Ok(SessionEnd::Finished) => break,
            Ok(SessionEnd::Disconnected) => {
                tracing::info!("agent link disconnected cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) if e.is_auth_expired() => {
                tracing::error!(error = %e, "agent key rejected, giving up");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "agent link error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "agent link reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "waiting before reconnect"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
            }
        }
    }

    tracing::debug!("agent link loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_serve(
    url: &Url,
    key: &SecretString,
    outbound_rx: &mut mpsc::Receiver<Value>,
    command_tx: &broadcast::Sender<Arc<Value>>,
    cancel: &CancellationToken,
) -> Result<SessionEnd, Error> {
    tracing::info!(url = %url, "connecting agent link");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let auth = serde_json::json!({ "type": "agent_auth", "key": key.expose_secret() });
    write
        .send(tungstenite::Message::text(auth.to_string()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tokio::time::timeout(HANDSHAKE_TIMEOUT, await_ack(&mut read))
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: HANDSHAKE_TIMEOUT.as_secs(),
        })??;

    tracing::info!("agent link authenticated");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(SessionEnd::Finished);
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(SessionEnd::Finished);
                };
                write
                    .send(tungstenite::Message::text(event.to_string()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, command_tx);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "agent link close frame received"
                            );
                        }
                        return Ok(SessionEnd::Disconnected);
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!("agent link stream ended");
                        return Ok(SessionEnd::Disconnected);
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                    }
                }
            }
        }
    }
}

/// Wait for `{"status":"authenticated"}`. A close frame in its place is
/// mapped by [`handshake_close_error`].
async fn await_ack<S>(read: &mut S) -> Result<(), Error>
where
    S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(tungstenite::Message::Text(text))) => {
                return if is_ack(&text) {
                    Ok(())
                } else {
                    Err(Error::Protocol(format!("unexpected handshake reply: {}", text.as_str())))
                };
            }
            Some(Ok(tungstenite::Message::Close(frame))) => {
                let (code, reason) = frame.map_or_else(
                    || (1005, String::new()),
                    |cf| (u16::from(cf.code), cf.reason.to_string()),
                );
                return Err(handshake_close_error(code, reason));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => return Err(Error::ConnectionClosed),
        }
    }
}

/// Only a rejected key is final. Any other close, including a 1008 because
/// another agent still holds the slot, is retried.
fn handshake_close_error(code: u16, reason: String) -> Error {
    if code == 1008 && reason == REASON_AUTH_FAILED {
        Error::Authentication { message: reason }
    } else {
        Error::WebSocketClosed { code, reason }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

fn is_ack(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .is_ok_and(|v| v.get("status").and_then(Value::as_str) == Some("authenticated"))
}

/// Parse a command frame and hand it to every command subscriber.
fn parse_and_broadcast(text: &str, command_tx: &broadcast::Sender<Arc<Value>>) {
    match serde_json::from_str::<Value>(text) {
        Ok(command) => {
            // No receivers just means nobody is listening for commands yet.
            let _ = command_tx.send(Arc::new(command));
        }
        Err(e) => tracing::debug!(error = %e, "failed to parse command frame"),
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% so a fleet of agents does not reconnect in lockstep.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn ack_detection() {
        assert!(is_ack(r#"{"status":"authenticated"}"#));
        assert!(!is_ack(r#"{"status":"pending"}"#));
        assert!(!is_ack("not json"));
    }

    #[test]
    fn only_a_rejected_key_stops_the_link() {
        let rejected = handshake_close_error(1008, REASON_AUTH_FAILED.into());
        assert!(rejected.is_auth_expired());

        let taken = handshake_close_error(1008, "Another agent is already connected.".into());
        assert!(!taken.is_auth_expired());
        assert!(matches!(taken, Error::WebSocketClosed { code: 1008, .. }));

        let away = handshake_close_error(1001, String::new());
        assert!(!away.is_auth_expired());
    }

    #[test]
    fn commands_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(4);
        parse_and_broadcast(r#"{"command":"scan","kind":"arp","target":"10.0.0.0/24"}"#, &tx);
        let cmd = rx.try_recv().unwrap();
        assert_eq!(cmd["command"], "scan");
        assert_eq!(cmd["kind"], "arp");
    }

    #[test]
    fn malformed_command_is_skipped() {
        let (tx, mut rx) = broadcast::channel::<Arc<Value>>(4);
        parse_and_broadcast("not json at all", &tx);
        assert!(rx.try_recv().is_err());
    }
}
