use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Identity;

/// An inbound chat event, before it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub room_id: u64,
    pub author: Identity,
    /// Message kind (`text`, `file`, `image`, ...).
    pub kind: String,
    pub content: Option<String>,
}

/// A recorded chat message. Serializes to the broadcast payload
/// `{id, user, type, content, timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    #[serde(skip)]
    pub room_id: u64,
    /// Author's username.
    pub user: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn broadcast_payload_shape() {
        let msg = StoredMessage {
            id: 3,
            room_id: 9,
            user: "alice".into(),
            kind: "text".into(),
            content: Some("hi".into()),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": 3,
                "user": "alice",
                "type": "text",
                "content": "hi",
                "timestamp": "2026-01-02T03:04:05Z"
            })
        );
    }
}
