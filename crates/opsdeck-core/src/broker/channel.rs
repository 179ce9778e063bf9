use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::{Frame, Peer};
use crate::model::{ChannelId, ConnectionId};

/// Point-in-time view of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub subscribers: usize,
    pub has_producer: bool,
}

/// Outcome of pushing a frame to a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProducerSend {
    Delivered,
    NoProducer,
    Busy,
}

/// Subscribers and optional producer of one channel. Owned by the broker task.
#[derive(Debug)]
pub(crate) struct Channel {
    id: ChannelId,
    subscribers: HashMap<ConnectionId, mpsc::Sender<Frame>>,
    producer: Option<Peer>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            subscribers: HashMap::new(),
            producer: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.producer.is_none()
    }

    pub(crate) fn stats(&self) -> ChannelStats {
        ChannelStats {
            subscribers: self.subscribers.len(),
            has_producer: self.producer.is_some(),
        }
    }

    /// Adds or replaces the subscriber with this connection id.
    pub(crate) fn add_subscriber(&mut self, peer: Peer) {
        self.subscribers.insert(peer.id, peer.tx);
    }

    pub(crate) fn remove_subscriber(&mut self, id: ConnectionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Claim the producer slot. Fails if it is already taken.
    pub(crate) fn set_producer(&mut self, peer: Peer) -> bool {
        if self.producer.is_some() {
            return false;
        }
        self.producer = Some(peer);
        true
    }

    /// Release the producer slot if `id` holds it.
    pub(crate) fn clear_producer(&mut self, id: ConnectionId) -> bool {
        if self.producer.as_ref().is_some_and(|p| p.id == id) {
            self.producer = None;
            return true;
        }
        false
    }

    /// Deliver `frame` to every subscriber. Subscribers whose queue is closed
    /// or full are dropped from the channel on the spot.
    pub(crate) fn relay(&mut self, frame: &Frame) -> usize {
        let channel = self.id;
        let before = self.subscribers.len();

        self.subscribers.retain(|id, tx| match tx.try_send(Frame::clone(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(%channel, connection_id = %id, "subscriber too slow, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%channel, connection_id = %id, "subscriber gone, dropping");
                false
            }
        });

        let delivered = self.subscribers.len();
        if delivered < before {
            debug!(%channel, dropped = before - delivered, "pruned subscribers during relay");
        }
        delivered
    }

    pub(crate) fn send_to_producer(&mut self, frame: Frame) -> ProducerSend {
        let Some(producer) = self.producer.as_ref() else {
            return ProducerSend::NoProducer;
        };
        match producer.tx.try_send(frame) {
            Ok(()) => ProducerSend::Delivered,
            Err(TrySendError::Full(_)) => ProducerSend::Busy,
            Err(TrySendError::Closed(_)) => {
                debug!(channel = %self.id, connection_id = %producer.id, "producer gone");
                self.producer = None;
                ProducerSend::NoProducer
            }
        }
    }
}
