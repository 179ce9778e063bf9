// ── Domain model ──
//
// Plain data carried between the registries, the broker and the
// persistence collaborator. No I/O lives here.

mod channel;
mod chat;
mod identity;
mod target;

pub use channel::ChannelId;
pub use chat::{ChatEvent, StoredMessage};
pub use identity::{ConnectionId, Identity};
pub use target::{Target, TargetId};
