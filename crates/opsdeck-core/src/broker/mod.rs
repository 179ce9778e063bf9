// ── Real-time broker ──
//
// Fan-out between producers and subscribers of logical channels. A single
// task owns every channel; the cloneable `Broker` handle talks to it over a
// bounded command queue with oneshot replies, so channel state is never
// shared between tasks and relays on one channel keep arrival order.

mod channel;
pub mod chat;
pub mod discovery;
pub mod handshake;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{ChannelId, ConnectionId};

pub use channel::ChannelStats;
use channel::{Channel, ProducerSend};

/// A serialized message. Encoded once per relay and shared by every recipient.
pub type Frame = Arc<str>;

/// One end of a duplex connection as the broker sees it: an id and a
/// bounded queue drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<Frame>,
}

impl Peer {
    /// Create a peer with a fresh id and its receiving half.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }
}

/// Serialize a message into a [`Frame`].
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Frame, CoreError> {
    serde_json::to_string(message)
        .map(Frame::from)
        .map_err(|e| CoreError::Internal(format!("failed to encode frame: {e}")))
}

// ── Commands ─────────────────────────────────────────────────────────

enum BrokerCommand {
    RegisterSubscriber {
        channel: ChannelId,
        peer: Peer,
        reply: oneshot::Sender<()>,
    },
    UnregisterSubscriber {
        channel: ChannelId,
        id: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    RegisterProducer {
        channel: ChannelId,
        peer: Peer,
        reply: oneshot::Sender<bool>,
    },
    UnregisterProducer {
        channel: ChannelId,
        id: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    Relay {
        channel: ChannelId,
        frame: Frame,
        reply: oneshot::Sender<usize>,
    },
    SendToProducer {
        channel: ChannelId,
        frame: Frame,
        reply: oneshot::Sender<ProducerSend>,
    },
    Stats {
        channel: ChannelId,
        reply: oneshot::Sender<ChannelStats>,
    },
    ChannelCount {
        reply: oneshot::Sender<usize>,
    },
}

// ── Broker handle ────────────────────────────────────────────────────

/// Cheaply cloneable handle to the broker task.
#[derive(Clone, Debug)]
pub struct Broker {
    command_tx: mpsc::Sender<BrokerCommand>,
    cancel: CancellationToken,
}

impl Broker {
    /// Spawn the broker task. It stops when `cancel` fires or every handle
    /// is dropped; all channels are dropped with it, which closes every
    /// registered peer's queue.
    pub fn spawn(queue_size: usize, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(queue_size.max(1));
        let handle = tokio::spawn(broker_task(command_rx, cancel.clone()));
        (Self { command_tx, cancel }, handle)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
    ) -> Result<T, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| CoreError::BrokerClosed)?;
        rx.await.map_err(|_| CoreError::BrokerClosed)
    }

    /// Add a subscriber, creating the channel if needed.
    pub async fn register_subscriber(&self, channel: ChannelId, peer: Peer) -> Result<(), CoreError> {
        self.request(|reply| BrokerCommand::RegisterSubscriber { channel, peer, reply })
            .await
    }

    /// Remove a subscriber. Removing one that is not registered is a no-op.
    pub async fn unregister_subscriber(
        &self,
        channel: ChannelId,
        id: ConnectionId,
    ) -> Result<(), CoreError> {
        self.request(|reply| BrokerCommand::UnregisterSubscriber { channel, id, reply })
            .await
    }

    /// Claim the channel's producer slot. `Ok(false)` if it is taken; the
    /// existing producer is left untouched.
    pub async fn register_producer(&self, channel: ChannelId, peer: Peer) -> Result<bool, CoreError> {
        self.request(|reply| BrokerCommand::RegisterProducer { channel, peer, reply })
            .await
    }

    /// Release the producer slot if `id` holds it.
    pub async fn unregister_producer(
        &self,
        channel: ChannelId,
        id: ConnectionId,
    ) -> Result<(), CoreError> {
        self.request(|reply| BrokerCommand::UnregisterProducer { channel, id, reply })
            .await
    }

    /// Deliver a frame to every subscriber of `channel`. Returns how many
    /// received it.
    pub async fn relay_from_producer(
        &self,
        channel: ChannelId,
        frame: Frame,
    ) -> Result<usize, CoreError> {
        self.request(|reply| BrokerCommand::Relay { channel, frame, reply })
            .await
    }

    /// Serialize `message` once and relay it.
    pub async fn relay_json<T: Serialize + ?Sized>(
        &self,
        channel: ChannelId,
        message: &T,
    ) -> Result<usize, CoreError> {
        self.relay_from_producer(channel, encode_frame(message)?).await
    }

    /// Push a frame to the channel's producer.
    pub async fn send_to_producer(&self, channel: ChannelId, frame: Frame) -> Result<(), CoreError> {
        let outcome = self
            .request(|reply| BrokerCommand::SendToProducer { channel, frame, reply })
            .await?;
        match outcome {
            ProducerSend::Delivered => Ok(()),
            ProducerSend::NoProducer => Err(CoreError::NoProducer {
                channel: channel.to_string(),
            }),
            ProducerSend::Busy => Err(CoreError::ProducerBusy {
                channel: channel.to_string(),
            }),
        }
    }

    pub async fn channel_stats(&self, channel: ChannelId) -> Result<ChannelStats, CoreError> {
        self.request(|reply| BrokerCommand::Stats { channel, reply })
            .await
    }

    /// Number of channels currently alive.
    pub async fn channel_count(&self) -> Result<usize, CoreError> {
        self.request(|reply| BrokerCommand::ChannelCount { reply })
            .await
    }

    /// Stop the broker task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Broker task ──────────────────────────────────────────────────────

async fn broker_task(mut rx: mpsc::Receiver<BrokerCommand>, cancel: CancellationToken) {
    let mut channels: HashMap<ChannelId, Channel> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.recv() => {
                let Some(command) = command else { break };
                handle_command(&mut channels, command);
            }
        }
    }

    info!(channels = channels.len(), "broker stopped");
}

fn handle_command(channels: &mut HashMap<ChannelId, Channel>, command: BrokerCommand) {
    match command {
        BrokerCommand::RegisterSubscriber { channel, peer, reply } => {
            debug!(%channel, connection_id = %peer.id, "subscriber registered");
            channels
                .entry(channel)
                .or_insert_with(|| Channel::new(channel))
                .add_subscriber(peer);
            let _ = reply.send(());
        }
        BrokerCommand::UnregisterSubscriber { channel, id, reply } => {
            if let Some(ch) = channels.get_mut(&channel) {
                if ch.remove_subscriber(id) {
                    debug!(%channel, connection_id = %id, "subscriber unregistered");
                }
            }
            collect_if_empty(channels, channel);
            let _ = reply.send(());
        }
        BrokerCommand::RegisterProducer { channel, peer, reply } => {
            let id = peer.id;
            let accepted = channels
                .entry(channel)
                .or_insert_with(|| Channel::new(channel))
                .set_producer(peer);
            if accepted {
                info!(%channel, connection_id = %id, "producer registered");
            } else {
                info!(%channel, connection_id = %id, "producer rejected, slot taken");
                collect_if_empty(channels, channel);
            }
            let _ = reply.send(accepted);
        }
        BrokerCommand::UnregisterProducer { channel, id, reply } => {
            if let Some(ch) = channels.get_mut(&channel) {
                if ch.clear_producer(id) {
                    info!(%channel, connection_id = %id, "producer unregistered");
                }
            }
            collect_if_empty(channels, channel);
            let _ = reply.send(());
        }
        BrokerCommand::Relay { channel, frame, reply } => {
            let delivered = channels.get_mut(&channel).map_or(0, |ch| ch.relay(&frame));
            collect_if_empty(channels, channel);
            let _ = reply.send(delivered);
        }
        BrokerCommand::SendToProducer { channel, frame, reply } => {
            let outcome = channels
                .get_mut(&channel)
                .map_or(ProducerSend::NoProducer, |ch| ch.send_to_producer(frame));
            collect_if_empty(channels, channel);
            let _ = reply.send(outcome);
        }
        BrokerCommand::Stats { channel, reply } => {
            let stats = channels.get(&channel).map(Channel::stats).unwrap_or_default();
            let _ = reply.send(stats);
        }
        BrokerCommand::ChannelCount { reply } => {
            let _ = reply.send(channels.len());
        }
    }
}

fn collect_if_empty(channels: &mut HashMap<ChannelId, Channel>, channel: ChannelId) {
    if channels.get(&channel).is_some_and(Channel::is_empty) {
        channels.remove(&channel);
        debug!(%channel, "channel removed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn broker() -> Broker {
        Broker::spawn(16, CancellationToken::new()).0
    }

    #[tokio::test]
    async fn second_producer_is_rejected_and_first_kept() {
        let broker = broker();
        let (first, mut first_rx) = Peer::channel(4);
        let (second, _second_rx) = Peer::channel(4);

        assert!(broker.register_producer(ChannelId::Discovery, first).await.unwrap());
        assert!(!broker.register_producer(ChannelId::Discovery, second.clone()).await.unwrap());

        // Releasing with the rejected id must not clear the slot.
        broker.unregister_producer(ChannelId::Discovery, second.id).await.unwrap();
        broker
            .send_to_producer(ChannelId::Discovery, Frame::from("{\"command\":\"scan\"}"))
            .await
            .unwrap();
        assert_eq!(first_rx.recv().await.as_deref(), Some("{\"command\":\"scan\"}"));
    }

    #[tokio::test]
    async fn relay_reaches_current_subscribers_only() {
        let broker = broker();
        let channel = ChannelId::ChatRoom(1);
        let (a, mut a_rx) = Peer::channel(4);
        let (b, mut b_rx) = Peer::channel(4);
        let b_id = b.id;

        broker.register_subscriber(channel, a).await.unwrap();
        broker.register_subscriber(channel, b).await.unwrap();
        broker.unregister_subscriber(channel, b_id).await.unwrap();

        let delivered = broker.relay_from_producer(channel, Frame::from("x")).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(a_rx.recv().await.as_deref(), Some("x"));
        // b's sender was dropped with the registration.
        assert_eq!(b_rx.recv().await, None);
    }

    #[tokio::test]
    async fn unregister_twice_is_a_noop() {
        let broker = broker();
        let (a, _rx) = Peer::channel(1);
        let id = a.id;
        broker.register_subscriber(ChannelId::Discovery, a).await.unwrap();
        broker.unregister_subscriber(ChannelId::Discovery, id).await.unwrap();
        broker.unregister_subscriber(ChannelId::Discovery, id).await.unwrap();
        assert_eq!(broker.channel_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_drops_only_that_subscriber() {
        let broker = broker();
        let channel = ChannelId::Discovery;
        let (alive, mut alive_rx) = Peer::channel(4);
        let (dead, dead_rx) = Peer::channel(4);
        drop(dead_rx);

        broker.register_subscriber(channel, alive).await.unwrap();
        broker.register_subscriber(channel, dead).await.unwrap();

        assert_eq!(broker.relay_from_producer(channel, Frame::from("1")).await.unwrap(), 1);
        assert_eq!(
            broker.channel_stats(channel).await.unwrap(),
            ChannelStats {
                subscribers: 1,
                has_producer: false
            }
        );
        assert_eq!(alive_rx.recv().await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn full_subscriber_is_dropped() {
        let broker = broker();
        let channel = ChannelId::Discovery;
        let (slow, _slow_rx) = Peer::channel(1);
        broker.register_subscriber(channel, slow).await.unwrap();

        assert_eq!(broker.relay_from_producer(channel, Frame::from("1")).await.unwrap(), 1);
        assert_eq!(broker.relay_from_producer(channel, Frame::from("2")).await.unwrap(), 0);
        assert_eq!(broker.channel_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_without_producer_fails() {
        let broker = broker();
        let err = broker
            .send_to_producer(ChannelId::Discovery, Frame::from("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoProducer { .. }));
    }

    #[tokio::test]
    async fn closed_producer_is_released() {
        let broker = broker();
        let (producer, rx) = Peer::channel(1);
        assert!(broker.register_producer(ChannelId::Discovery, producer).await.unwrap());
        drop(rx);

        let err = broker
            .send_to_producer(ChannelId::Discovery, Frame::from("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoProducer { .. }));

        let (next, _next_rx) = Peer::channel(1);
        assert!(broker.register_producer(ChannelId::Discovery, next).await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_closes_peer_queues() {
        let (broker, task) = Broker::spawn(4, CancellationToken::new());
        let (sub, mut rx) = Peer::channel(1);
        broker.register_subscriber(ChannelId::Discovery, sub).await.unwrap();

        broker.shutdown();
        task.await.unwrap();

        assert_eq!(rx.recv().await, None);
        assert!(matches!(
            broker.channel_count().await,
            Err(CoreError::BrokerClosed)
        ));
    }
}
