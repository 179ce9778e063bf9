// ── Dedicated (unpooled) connections ──
//
// A dedicated connection belongs to exactly one long-running operation.
// Nothing else can reach it, and it is closed when the owner calls
// `close` or, failing that, when the handle is dropped.

use opsdeck_api::{ApiRequest, Connection, ConnectorSet, TransportConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Target, TargetId};

/// Opens [`DedicatedConnection`]s.
#[derive(Debug)]
pub struct DedicatedConnectionFactory {
    connectors: ConnectorSet,
    transport: TransportConfig,
}

impl DedicatedConnectionFactory {
    pub fn new(connectors: ConnectorSet, transport: TransportConfig) -> Self {
        Self {
            connectors,
            transport,
        }
    }

    pub async fn open(&self, target: &Target) -> Result<DedicatedConnection, CoreError> {
        let connector = self.connectors.connector(target.kind)?;
        let params = target.connection_params(&self.transport);
        let connection = connector
            .open(&params)
            .await
            .map_err(|e| CoreError::ConnectionFailed {
                target: format!("{} ({})", target.name, params.address()),
                reason: e.to_string(),
            })?;

        debug!(target_id = %target.id, "opened dedicated connection");
        Ok(DedicatedConnection {
            target_id: target.id,
            connection: Some(connection),
        })
    }
}

/// An exclusively owned vendor connection. Not `Clone`.
#[derive(Debug)]
pub struct DedicatedConnection {
    target_id: TargetId,
    connection: Option<Box<dyn Connection>>,
}

impl DedicatedConnection {
    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    pub async fn call(&self, request: ApiRequest) -> Result<Value, opsdeck_api::Error> {
        match &self.connection {
            Some(conn) => conn.call(request).await,
            None => Err(opsdeck_api::Error::ConnectionClosed),
        }
    }

    /// Close the connection. Errors are logged and swallowed.
    pub async fn close(mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close().await;
            debug!(target_id = %self.target_id, "closed dedicated connection");
        }
    }
}

impl Drop for DedicatedConnection {
    fn drop(&mut self) {
        let Some(conn) = self.connection.take() else {
            return;
        };
        warn!(target_id = %self.target_id, "dedicated connection dropped without close");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { conn.close().await });
        }
    }
}
