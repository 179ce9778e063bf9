// opsdeck-api: Async vendor connectors (RouterOS, REST appliances, vCenter) and the agent link

pub mod agent_link;
pub mod connector;
pub mod error;
pub mod rest;
pub mod routeros;
pub mod transport;
pub mod vcenter;

pub use connector::{
    ApiRequest, Connection, ConnectionParams, Connector, ConnectorSet, ProtocolKind,
    SessionLogin, Verb,
};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
