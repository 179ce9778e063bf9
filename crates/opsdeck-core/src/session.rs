// ── Session token cache ──
//
// Zero or one cached login token per target. Devices do not tell us when a
// token expires, so entries never age out on their own; instead callers go
// through `with_token`, which re-logs in once when the device rejects the
// cached token.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opsdeck_api::{ConnectorSet, TransportConfig};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{Target, TargetId};

/// A cached login token.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub target_id: TargetId,
    pub token: SecretString,
    pub obtained_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<TokenEntry>>>;

/// Per-target login token cache.
pub struct SessionCache {
    connectors: ConnectorSet,
    transport: TransportConfig,
    slots: DashMap<TargetId, Slot>,
}

impl SessionCache {
    pub fn new(connectors: ConnectorSet, transport: TransportConfig) -> Self {
        Self {
            connectors,
            transport,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, id: TargetId) -> Slot {
        self.slots.entry(id).or_default().value().clone()
    }

    /// Return the cached token, logging in first if there is none.
    ///
    /// Concurrent callers for one target wait on the same lock, so a cold
    /// cache performs exactly one login.
    pub async fn get_token(&self, target: &Target) -> Result<SecretString, CoreError> {
        let slot = self.slot(target.id);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            return Ok(entry.token.clone());
        }

        let entry = self.login(target).await?;
        let token = entry.token.clone();
        *guard = Some(entry);
        Ok(token)
    }

    /// Drop the cached token so the next access logs in again.
    pub async fn invalidate(&self, id: TargetId) {
        let Some(slot) = self.slots.get(&id).map(|s| s.value().clone()) else {
            return;
        };
        if slot.lock().await.take().is_some() {
            debug!(target_id = %id, "invalidated session token");
        }
    }

    /// Log in unconditionally and overwrite the cached token.
    pub async fn force_refresh(&self, target: &Target) -> Result<SecretString, CoreError> {
        let slot = self.slot(target.id);
        let mut guard = slot.lock().await;
        let entry = self.login(target).await?;
        let token = entry.token.clone();
        *guard = Some(entry);
        Ok(token)
    }

    /// A copy of the cached entry, if any.
    pub async fn entry(&self, id: TargetId) -> Option<TokenEntry> {
        let slot = self.slots.get(&id).map(|s| s.value().clone())?;
        let guard = slot.lock().await;
        (*guard).clone()
    }

    /// Run `op` with the cached token. If the device rejects the token, log
    /// in again and retry exactly once.
    pub async fn with_token<T, F, Fut>(&self, target: &Target, op: F) -> Result<T, CoreError>
    where
        F: Fn(SecretString) -> Fut,
        Fut: Future<Output = Result<T, opsdeck_api::Error>>,
    {
        let token = self.get_token(target).await?;
        match op(token.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_auth_expired() => {
                debug!(target_id = %target.id, error = %e, "token rejected, refreshing");
                let fresh = self.refresh_if_unchanged(target, &token).await?;
                op(fresh).await.map_err(CoreError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `stale` with a fresh token, unless another caller already did.
    async fn refresh_if_unchanged(
        &self,
        target: &Target,
        stale: &SecretString,
    ) -> Result<SecretString, CoreError> {
        let slot = self.slot(target.id);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.token.expose_secret() != stale.expose_secret() {
                return Ok(entry.token.clone());
            }
        }

        let entry = self.login(target).await?;
        let token = entry.token.clone();
        *guard = Some(entry);
        Ok(token)
    }

    async fn login(&self, target: &Target) -> Result<TokenEntry, CoreError> {
        let login = self.connectors.login(target.kind)?;
        let params = target.connection_params(&self.transport);

        let token = login
            .login(&params)
            .await
            .map_err(|e| CoreError::AuthenticationFailed {
                message: format!("login to {} failed: {e}", target.name),
            })?;

        info!(target_id = %target.id, kind = %target.kind, "obtained session token");
        Ok(TokenEntry {
            target_id: target.id,
            token: SecretString::from(token),
            obtained_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}
