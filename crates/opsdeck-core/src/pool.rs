// ── Pooled connection registry ──
//
// Zero or one shared vendor connection per target. Each target owns a slot
// guarded by its own async mutex, so acquires for one target are serialized
// while different targets proceed in parallel. Slots are never removed from
// the map once created: removing one while a waiter still holds it would
// let two live connections exist for the same target.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use opsdeck_api::{Connection, ConnectorSet, TransportConfig};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{Target, TargetId};

/// Liveness of a pooled connection as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Liveness {
    Live,
    /// Failed its last probe; will be replaced on the next acquire.
    Stale,
    /// Closed by `evict` or `shutdown`.
    Closed,
}

struct PoolEntry {
    connection: Arc<dyn Connection>,
    liveness: Liveness,
}

type Slot = Arc<Mutex<Option<PoolEntry>>>;

// ── PooledConnection ─────────────────────────────────────────────────

/// A logical handle onto a pooled connection.
///
/// Dropping it does not close anything; the registry owns the connection.
#[derive(Clone)]
pub struct PooledConnection {
    target_id: TargetId,
    connection: Arc<dyn Connection>,
}

impl PooledConnection {
    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    /// Whether two handles refer to the same underlying connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection)
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("target_id", &self.target_id)
            .field("connection", &self.connection)
            .finish()
    }
}

// ── PoolRegistry ─────────────────────────────────────────────────────

/// Shared, reusable vendor connections keyed by target.
pub struct PoolRegistry {
    connectors: ConnectorSet,
    transport: TransportConfig,
    slots: DashMap<TargetId, Slot>,
    shut_down: AtomicBool,
}

impl PoolRegistry {
    pub fn new(connectors: ConnectorSet, transport: TransportConfig) -> Self {
        Self {
            connectors,
            transport,
            slots: DashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Clone the slot out of the map so no shard lock is held across awaits.
    fn slot(&self, id: TargetId) -> Slot {
        self.slots.entry(id).or_default().value().clone()
    }

    fn existing_slots(&self) -> Vec<(TargetId, Slot)> {
        self.slots
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Get a live connection to `target`, opening or replacing it as needed.
    ///
    /// An existing entry is probed first. If the probe fails the old
    /// connection is closed (errors ignored) and a new one is opened in its
    /// place, all under the target's lock.
    pub async fn acquire(&self, target: &Target) -> Result<PooledConnection, CoreError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::ConnectionFailed {
                target: target.name.clone(),
                reason: "connection pool is shut down".into(),
            });
        }

        let slot = self.slot(target.id);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_mut() {
            if entry.liveness == Liveness::Live {
                match entry.connection.probe().await {
                    Ok(()) => {
                        debug!(target_id = %target.id, "reusing pooled connection");
                        return Ok(PooledConnection {
                            target_id: target.id,
                            connection: Arc::clone(&entry.connection),
                        });
                    }
                    Err(e) => {
                        warn!(
                            target_id = %target.id,
                            error = %e,
                            "pooled connection seems stale, reconnecting"
                        );
                        entry.liveness = Liveness::Stale;
                    }
                }
            }
        }

        if let Some(old) = guard.take() {
            if old.liveness != Liveness::Closed {
                old.connection.close().await;
            }
        }

        let connection = self.open(target).await?;
        *guard = Some(PoolEntry {
            connection: Arc::clone(&connection),
            liveness: Liveness::Live,
        });
        info!(target_id = %target.id, kind = %target.kind, "opened pooled connection");

        Ok(PooledConnection {
            target_id: target.id,
            connection,
        })
    }

    async fn open(&self, target: &Target) -> Result<Arc<dyn Connection>, CoreError> {
        let connector = self.connectors.connector(target.kind)?;
        let params = target.connection_params(&self.transport);
        connector
            .open(&params)
            .await
            .map(Arc::from)
            .map_err(|e| CoreError::ConnectionFailed {
                target: format!("{} ({})", target.name, params.address()),
                reason: e.to_string(),
            })
    }

    /// Close and drop the pooled connection for `id`, if any.
    pub async fn evict(&self, id: TargetId) {
        let Some(slot) = self.slots.get(&id).map(|s| s.value().clone()) else {
            return;
        };
        let old = slot.lock().await.take();
        if let Some(old) = old {
            if old.liveness != Liveness::Closed {
                old.connection.close().await;
            }
            debug!(target_id = %id, "evicted pooled connection");
        }
    }

    /// Last observed liveness, or `None` if no entry exists.
    pub async fn liveness(&self, id: TargetId) -> Option<Liveness> {
        let slot = self.slots.get(&id).map(|s| s.value().clone())?;
        let guard = slot.lock().await;
        guard.as_ref().map(|e| e.liveness)
    }

    /// Number of targets with a pooled entry (in any liveness state).
    pub async fn len(&self) -> usize {
        let mut count = 0;
        for (_, slot) in self.existing_slots() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every pooled connection and refuse further acquires.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);

        let closes = self.existing_slots().into_iter().map(|(id, slot)| async move {
            let mut guard = slot.lock().await;
            if let Some(entry) = guard.as_mut() {
                if entry.liveness != Liveness::Closed {
                    entry.connection.close().await;
                    entry.liveness = Liveness::Closed;
                    debug!(target_id = %id, "closed pooled connection");
                }
            }
        });
        futures_util::future::join_all(closes).await;
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("slots", &self.slots.len())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
