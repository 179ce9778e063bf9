// ── Chat rooms ──
//
// Chat is a broker channel per room with no producer: every participant
// posts, and each post is recorded before it is fanned out. If recording
// fails nothing is broadcast. Posts to one room are serialized so the
// broadcast order matches the recorded order.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::Broker;
use crate::error::CoreError;
use crate::model::{ChannelId, ChatEvent, Identity, StoredMessage};
use crate::store::Persistence;

/// A message as typed by a participant.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundChat {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<String>,
}

fn default_kind() -> String {
    "text".to_owned()
}

/// Records and relays chat messages.
#[derive(Clone)]
pub struct ChatService {
    broker: Broker,
    store: Arc<dyn Persistence>,
    rooms: Arc<DashMap<u64, Arc<Mutex<()>>>>,
}

impl ChatService {
    pub fn new(broker: Broker, store: Arc<dyn Persistence>) -> Self {
        Self {
            broker,
            store,
            rooms: Arc::new(DashMap::new()),
        }
    }

    fn room_lock(&self, room_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(self.rooms.entry(room_id).or_default().value())
    }

    /// Record a message and broadcast it to the room.
    pub async fn post(
        &self,
        room_id: u64,
        author: &Identity,
        inbound: InboundChat,
    ) -> Result<StoredMessage, CoreError> {
        let room = self.room_lock(room_id);
        let _posting = room.lock().await;

        let stored = self
            .store
            .record_event(ChatEvent {
                room_id,
                author: author.clone(),
                kind: inbound.kind,
                content: inbound.content,
            })
            .await?;

        let delivered = self
            .broker
            .relay_json(ChannelId::ChatRoom(room_id), &stored)
            .await?;
        debug!(room_id, message_id = stored.id, delivered, "chat message relayed");
        Ok(stored)
    }

    /// Parse a raw frame from a participant and post it.
    pub async fn post_frame(
        &self,
        room_id: u64,
        author: &Identity,
        text: &str,
    ) -> Result<StoredMessage, CoreError> {
        let inbound: InboundChat =
            serde_json::from_str(text).map_err(|e| CoreError::ProtocolViolation {
                message: format!("malformed chat message: {e}"),
            })?;
        self.post(room_id, author, inbound).await
    }

    pub async fn history(&self, room_id: u64) -> Result<Vec<StoredMessage>, CoreError> {
        self.store.chat_history(room_id).await
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService").finish_non_exhaustive()
    }
}
