// ── Persistence collaborator ──
//
// The relational store is external to this crate. `Persistence` is the
// narrow contract the core needs from it; `MemoryStore` is the in-process
// implementation used by the binary and by tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{ChatEvent, StoredMessage, Target, TargetId};

/// Device and chat persistence.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Look up a target record. `Ok(None)` when no such id exists.
    async fn load_target(&self, id: TargetId) -> Result<Option<Target>, CoreError>;

    /// Durably record a chat event, returning the stored message with its
    /// assigned id and timestamp.
    async fn record_event(&self, event: ChatEvent) -> Result<StoredMessage, CoreError>;

    /// Messages of one room, oldest first.
    async fn chat_history(&self, room_id: u64) -> Result<Vec<StoredMessage>, CoreError>;
}

/// Lock-free in-memory [`Persistence`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    targets: DashMap<TargetId, Target>,
    rooms: DashMap<u64, Vec<StoredMessage>>,
    next_message_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-seeded with targets.
    pub fn with_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let store = Self::new();
        for target in targets {
            store.upsert_target(target);
        }
        store
    }

    /// Insert or replace a target record.
    pub fn upsert_target(&self, target: Target) {
        debug!(target_id = %target.id, name = %target.name, "upserting target");
        self.targets.insert(target.id, target);
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn load_target(&self, id: TargetId) -> Result<Option<Target>, CoreError> {
        Ok(self.targets.get(&id).map(|t| t.value().clone()))
    }

    async fn record_event(&self, event: ChatEvent) -> Result<StoredMessage, CoreError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message = StoredMessage {
            id,
            room_id: event.room_id,
            user: event.author.username,
            kind: event.kind,
            content: event.content,
            timestamp: Utc::now(),
        };
        self.rooms
            .entry(event.room_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn chat_history(&self, room_id: u64) -> Result<Vec<StoredMessage>, CoreError> {
        Ok(self
            .rooms
            .get(&room_id)
            .map(|msgs| msgs.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Identity;

    fn event(room_id: u64, content: &str) -> ChatEvent {
        ChatEvent {
            room_id,
            author: Identity {
                user_id: 1,
                username: "alice".into(),
            },
            kind: "text".into(),
            content: Some(content.into()),
        }
    }

    #[tokio::test]
    async fn record_assigns_increasing_ids_per_store() {
        let store = MemoryStore::new();
        let a = store.record_event(event(1, "one")).await.unwrap();
        let b = store.record_event(event(2, "two")).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.user, "alice");
    }

    #[tokio::test]
    async fn history_is_scoped_to_room_and_ordered() {
        let store = MemoryStore::new();
        store.record_event(event(1, "first")).await.unwrap();
        store.record_event(event(2, "elsewhere")).await.unwrap();
        store.record_event(event(1, "second")).await.unwrap();

        let history = store.chat_history(1).await.unwrap();
        let contents: Vec<_> = history.iter().filter_map(|m| m.content.as_deref()).collect();
        assert_eq!(contents, ["first", "second"]);
        assert!(store.chat_history(99).await.unwrap().is_empty());
    }
}
