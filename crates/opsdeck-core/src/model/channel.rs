use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A logical fan-out channel.
///
/// Rendered as `discovery` or `chat:{room_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// The network discovery feed (one agent, many admin consoles).
    Discovery,
    /// A chat room.
    ChatRoom(u64),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => f.write_str("discovery"),
            Self::ChatRoom(room) => write!(f, "chat:{room}"),
        }
    }
}

impl FromStr for ChannelId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidChannel { raw: s.to_owned() };

        if s == "discovery" {
            return Ok(Self::Discovery);
        }
        let room = s.strip_prefix("chat:").ok_or_else(invalid)?;
        room.parse().map(Self::ChatRoom).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders() {
        assert_eq!("discovery".parse::<ChannelId>().ok(), Some(ChannelId::Discovery));
        assert_eq!("chat:12".parse::<ChannelId>().ok(), Some(ChannelId::ChatRoom(12)));
        assert_eq!(ChannelId::ChatRoom(12).to_string(), "chat:12");
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for raw in ["", "chat:", "chat:abc", "chat:-1", "telemetry", "Discovery"] {
            assert!(
                matches!(raw.parse::<ChannelId>(), Err(CoreError::InvalidChannel { .. })),
                "{raw:?} should be rejected"
            );
        }
    }
}
