// ── Core error types ──
//
// Domain errors from opsdeck-core. Consumers never see raw wire-level
// failures; the `From<opsdeck_api::Error>` impl folds them into the
// variants below.

use thiserror::Error;

use crate::model::TargetId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// Opening or logging in to a vendor connection failed.
    #[error("Cannot connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    /// Login was rejected or a token could not be obtained.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Duplex / broker errors ───────────────────────────────────────
    /// A peer broke the message protocol (bad handshake, wrong key, bad frame).
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// The channel has no producer to receive a command.
    #[error("No producer connected to channel {channel}")]
    NoProducer { channel: String },

    /// The producer's inbound queue is full.
    #[error("Producer on channel {channel} is not keeping up")]
    ProducerBusy { channel: String },

    /// The channel id could not be parsed.
    #[error("Invalid channel id: {raw}")]
    InvalidChannel { raw: String },

    /// The broker task has stopped.
    #[error("Broker is shut down")]
    BrokerClosed,

    // ── Telemetry errors ─────────────────────────────────────────────
    /// A counter read against a dedicated connection failed.
    #[error("Sampling failed on {target}: {reason}")]
    SamplingFailed { target: String, reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Target not found: {id}")]
    TargetNotFound { id: TargetId },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether a fresh login might fix this.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<opsdeck_api::Error> for CoreError {
    fn from(err: opsdeck_api::Error) -> Self {
        use opsdeck_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            Api::Api { status: 401, message } => CoreError::AuthenticationFailed { message },
            Api::Transport(ref e) => CoreError::ConnectionFailed {
                target: e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string),
                reason: e.to_string(),
            },
            Api::Io(e) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: e.to_string(),
            },
            Api::Timeout { timeout_secs } => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("timed out after {timeout_secs}s"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::ConnectionClosed => CoreError::ConnectionFailed {
                target: String::new(),
                reason: "connection closed".into(),
            },
            Api::Fatal { message } => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("device closed the session: {message}"),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::Trap { message } => CoreError::Internal(format!("device rejected command: {message}")),
            Api::Protocol(message) => CoreError::ProtocolViolation { message },
            Api::Api { status, message } => {
                CoreError::Internal(format!("API error (HTTP {status}): {message}"))
            }
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::UnsupportedProtocol(message) => CoreError::Config { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expiry_maps_to_auth_failure() {
        let err = CoreError::from(opsdeck_api::Error::SessionExpired);
        assert!(err.is_auth_expired());

        let err = CoreError::from(opsdeck_api::Error::Api {
            status: 401,
            message: "ticket expired".into(),
        });
        assert!(err.is_auth_expired());
    }

    #[test]
    fn io_failure_maps_to_connection_failed() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CoreError::from(opsdeck_api::Error::Io(io));
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    }
}
