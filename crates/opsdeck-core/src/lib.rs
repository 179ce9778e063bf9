// opsdeck-core: Connection registries, real-time broker and telemetry polling.

pub mod auth;
pub mod broker;
pub mod config;
pub mod dedicated;
pub mod error;
pub mod hub;
pub mod model;
pub mod pool;
pub mod session;
pub mod store;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{IdentityVerifier, JwtVerifier};
pub use broker::chat::{ChatService, InboundChat};
pub use broker::{Broker, ChannelStats, Frame, Peer};
pub use config::HubConfig;
pub use dedicated::{DedicatedConnection, DedicatedConnectionFactory};
pub use error::CoreError;
pub use hub::Hub;
pub use model::{ChannelId, ChatEvent, ConnectionId, Identity, StoredMessage, Target, TargetId};
pub use pool::{Liveness, PoolRegistry, PooledConnection};
pub use session::{SessionCache, TokenEntry};
pub use store::{MemoryStore, Persistence};
pub use telemetry::{Rate, StreamEnd, TelemetryPoller, TrafficMessage};
