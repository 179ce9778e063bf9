// ── Hub ──
//
// Owns every registry and background task of the subsystem. Built
// explicitly at startup and shared by cloning; `shutdown` stops the broker
// and closes every pooled connection.

use std::sync::Arc;

use opsdeck_api::ConnectorSet;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::broker::Broker;
use crate::broker::chat::ChatService;
use crate::config::HubConfig;
use crate::dedicated::DedicatedConnectionFactory;
use crate::error::CoreError;
use crate::model::{Target, TargetId};
use crate::pool::PoolRegistry;
use crate::session::SessionCache;
use crate::store::Persistence;
use crate::telemetry::TelemetryPoller;

/// Cheaply cloneable via `Arc<HubInner>`.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    pool: PoolRegistry,
    sessions: SessionCache,
    dedicated: Arc<DedicatedConnectionFactory>,
    broker: Broker,
    chat: ChatService,
    poller: TelemetryPoller,
    store: Arc<dyn Persistence>,
    verifier: Arc<dyn IdentityVerifier>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Build a hub with the built-in connectors and a JWT verifier.
    ///
    /// Spawns the broker task, so it must be called inside a Tokio runtime.
    pub fn new(config: HubConfig, store: Arc<dyn Persistence>) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
        Self::with_parts(config, ConnectorSet::with_defaults(), store, verifier)
    }

    /// Build a hub from explicit collaborators.
    pub fn with_parts(
        config: HubConfig,
        connectors: ConnectorSet,
        store: Arc<dyn Persistence>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let transport = config.transport.clone();

        let (broker, broker_task) = Broker::spawn(config.broker_queue, cancel.child_token());
        let dedicated = Arc::new(DedicatedConnectionFactory::new(
            connectors.clone(),
            transport.clone(),
        ));

        Self {
            inner: Arc::new(HubInner {
                pool: PoolRegistry::new(connectors.clone(), transport.clone()),
                sessions: SessionCache::new(connectors, transport),
                poller: TelemetryPoller::new(Arc::clone(&dedicated), config.sample_interval),
                chat: ChatService::new(broker.clone(), Arc::clone(&store)),
                dedicated,
                broker,
                store,
                verifier,
                cancel,
                task_handles: Mutex::new(vec![broker_task]),
                config,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &PoolRegistry {
        &self.inner.pool
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.inner.sessions
    }

    pub fn dedicated(&self) -> &DedicatedConnectionFactory {
        &self.inner.dedicated
    }

    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    pub fn chat(&self) -> &ChatService {
        &self.inner.chat
    }

    pub fn poller(&self) -> &TelemetryPoller {
        &self.inner.poller
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.inner.store
    }

    pub fn verifier(&self) -> &Arc<dyn IdentityVerifier> {
        &self.inner.verifier
    }

    /// A token cancelled when the hub shuts down. Long-running per-connection
    /// work should select on one of these.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Fetch an active target record.
    ///
    /// Inactive targets are reported as not found.
    pub async fn load_target(&self, id: TargetId) -> Result<Target, CoreError> {
        match self.inner.store.load_target(id).await? {
            Some(target) if target.active => Ok(target),
            Some(_) => {
                debug!(target_id = %id, "target is inactive");
                Err(CoreError::TargetNotFound { id })
            }
            None => Err(CoreError::TargetNotFound { id }),
        }
    }

    /// Stop background tasks and close every pooled connection.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.pool.shutdown().await;
        info!("hub shut down");
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}
