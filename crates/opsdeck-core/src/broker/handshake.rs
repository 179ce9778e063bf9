//! Producer handshake and duplex close codes.
//!
//! A producer's first message must be `{"type":"agent_auth","key":"..."}`
//! carrying the shared agent key. Only after it checks out is the producer
//! registered and answered with [`AUTH_ACK`].

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::CoreError;

/// Reply sent to a producer once its key is accepted.
pub const AUTH_ACK: &str = r#"{"status":"authenticated"}"#;

/// WebSocket close code for authentication and policy failures.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code for server-side failures (e.g. a device is unreachable).
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub use opsdeck_api::agent_link::REASON_AUTH_FAILED;
pub const REASON_PRODUCER_TAKEN: &str = "Another agent is already connected.";
pub const REASON_INVALID_TOKEN: &str = "Invalid token";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Hello {
    AgentAuth { key: String },
}

/// Check a producer's first message against the expected key.
pub fn verify_agent_auth(first_message: &str, expected: &SecretString) -> Result<(), CoreError> {
    let hello: Hello = serde_json::from_str(first_message).map_err(|e| {
        CoreError::ProtocolViolation {
            message: format!("expected agent_auth message: {e}"),
        }
    })?;

    let Hello::AgentAuth { key } = hello;
    if constant_time_eq(key.as_bytes(), expected.expose_secret().as_bytes()) {
        Ok(())
    } else {
        Err(CoreError::ProtocolViolation {
            message: "agent key mismatch".into(),
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
