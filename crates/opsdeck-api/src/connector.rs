//! Vendor connector abstraction.
//!
//! Every vendor protocol is reduced to one capability set: open a
//! connection from [`ConnectionParams`], issue [`ApiRequest`]s on it, probe
//! it for liveness and close it. Implementations are selected by their
//! [`ProtocolKind`] tag through a [`ConnectorSet`], never by inheritance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::rest::{RestConnector, RestFlavor};
use crate::routeros::RouterOsConnector;
use crate::transport::TransportConfig;
use crate::vcenter::VCenterLogin;

// ── ProtocolKind ─────────────────────────────────────────────────────

/// Management protocol spoken by a target.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProtocolKind {
    /// MikroTik RouterOS binary API.
    RouterOs,
    /// VMware vCenter REST API (session-token login).
    VCenter,
    /// Proxmox VE REST API (static API token).
    Proxmox,
    /// FortiGate REST API (bearer API key).
    FortiGate,
}

impl ProtocolKind {
    /// Port used when the target record does not carry one.
    pub fn default_port(self) -> u16 {
        match self {
            Self::RouterOs => 8728,
            Self::Proxmox => 8006,
            Self::VCenter | Self::FortiGate => 443,
        }
    }
}

// ── ConnectionParams ─────────────────────────────────────────────────

/// Everything a connector needs to reach and authenticate to one target.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    /// Login name, or token id for token-based protocols.
    pub username: String,
    /// Password, token secret or API key.
    pub secret: SecretString,
    pub transport: TransportConfig,
}

impl ConnectionParams {
    /// `host:port`, for logging and socket addressing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── ApiRequest ───────────────────────────────────────────────────────

/// HTTP-style verb. RouterOS connections ignore it: the command word
/// in [`ApiRequest::path`] already says what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

/// A single request against a vendor connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub verb: Verb,
    /// REST path (`/nodes`) or RouterOS command (`/interface/print`).
    pub path: String,
    /// Query parameters (REST) or `=key=value` attribute words (RouterOS).
    pub params: Vec<(String, String)>,
    /// JSON body for REST writes.
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            verb: Verb::Get,
            path: path.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            verb: Verb::Post,
            path: path.into(),
            params: Vec::new(),
            body,
        }
    }

    /// Append a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// An open connection to one target.
///
/// Shared connections must tolerate concurrent `call`s; implementations
/// serialize internally where the wire protocol requires it.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProtocolKind;

    /// Issue a request and return the decoded reply.
    async fn call(&self, request: ApiRequest) -> Result<Value, Error>;

    /// Cheap liveness check.
    async fn probe(&self) -> Result<(), Error>;

    /// Close the connection. Best-effort: errors are logged, never returned.
    async fn close(&self);
}

/// Opens connections for one protocol kind.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>, Error>;
}

/// Exchanges credentials for an opaque session token.
#[async_trait]
pub trait SessionLogin: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    async fn login(&self, params: &ConnectionParams) -> Result<String, Error>;
}

// ── ConnectorSet ─────────────────────────────────────────────────────

/// Tag → implementation lookup for connectors and session logins.
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<ProtocolKind, Arc<dyn Connector>>,
    logins: HashMap<ProtocolKind, Arc<dyn SessionLogin>>,
}

impl ConnectorSet {
    /// An empty set. Use [`with_defaults`](Self::with_defaults) for the
    /// built-in vendors.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in connectors and logins.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_connector(Arc::new(RouterOsConnector))
            .with_connector(Arc::new(RestConnector::new(RestFlavor::Proxmox)))
            .with_connector(Arc::new(RestConnector::new(RestFlavor::FortiGate)))
            .with_login(Arc::new(VCenterLogin))
    }

    /// Register (or replace) the connector for its protocol kind.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    /// Register (or replace) the session login for its protocol kind.
    pub fn with_login(mut self, login: Arc<dyn SessionLogin>) -> Self {
        self.logins.insert(login.kind(), login);
        self
    }

    pub fn connector(&self, kind: ProtocolKind) -> Result<&Arc<dyn Connector>, Error> {
        self.connectors
            .get(&kind)
            .ok_or_else(|| Error::UnsupportedProtocol(format!("no connector for {kind}")))
    }

    pub fn login(&self, kind: ProtocolKind) -> Result<&Arc<dyn SessionLogin>, Error> {
        self.logins
            .get(&kind)
            .ok_or_else(|| Error::UnsupportedProtocol(format!("no session login for {kind}")))
    }
}

impl fmt::Debug for ConnectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSet")
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .field("logins", &self.logins.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_kind_round_trips_through_tag() {
        assert_eq!(ProtocolKind::RouterOs.to_string(), "router_os");
        assert_eq!("proxmox".parse::<ProtocolKind>().ok(), Some(ProtocolKind::Proxmox));
        assert!("telnet".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn default_ports() {
        assert_eq!(ProtocolKind::RouterOs.default_port(), 8728);
        assert_eq!(ProtocolKind::Proxmox.default_port(), 8006);
        assert_eq!(ProtocolKind::VCenter.default_port(), 443);
    }

    #[test]
    fn default_set_dispatches_by_tag() {
        let set = ConnectorSet::with_defaults();
        assert_eq!(
            set.connector(ProtocolKind::RouterOs).map(|c| c.kind()).ok(),
            Some(ProtocolKind::RouterOs)
        );
        assert!(set.connector(ProtocolKind::VCenter).is_err());
        assert!(set.login(ProtocolKind::VCenter).is_ok());
        assert!(set.login(ProtocolKind::RouterOs).is_err());
    }

    #[test]
    fn request_builder_appends_params() {
        let req = ApiRequest::get("/interface/print").param(".proplist", "name,rx-byte");
        assert_eq!(req.verb, Verb::Get);
        assert_eq!(req.params, vec![(".proplist".to_owned(), "name,rx-byte".to_owned())]);
    }
}
