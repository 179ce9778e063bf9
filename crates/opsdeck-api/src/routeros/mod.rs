//! MikroTik RouterOS binary API (plain TCP, default port 8728).

pub mod client;
pub mod codec;

use async_trait::async_trait;

pub use client::{Row, RouterOsClient};
pub use codec::{Sentence, SentenceCodec};

use crate::connector::{Connection, ConnectionParams, Connector, ProtocolKind};
use crate::error::Error;

/// Opens authenticated [`RouterOsClient`] sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterOsConnector;

#[async_trait]
impl Connector for RouterOsConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::RouterOs
    }

    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>, Error> {
        Ok(Box::new(RouterOsClient::connect(params).await?))
    }
}
