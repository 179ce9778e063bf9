use std::fmt;

use opsdeck_api::{ConnectionParams, ProtocolKind, TransportConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Stable identifier of a managed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TargetId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A managed device record, as supplied by the persistence layer.
///
/// Treated as immutable while a pooled connection or cached token exists
/// for its id.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub host: String,
    /// Explicit port; falls back to the protocol default when absent.
    pub port: Option<u16>,
    pub kind: ProtocolKind,
    pub username: String,
    pub secret: SecretString,
    pub active: bool,
}

impl Target {
    /// The port to dial: explicit, else the protocol default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    /// Everything a connector needs to reach this target.
    pub fn connection_params(&self, transport: &TransportConfig) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port(),
            username: self.username.clone(),
            secret: self.secret.clone(),
            transport: transport.clone(),
        }
    }
}
