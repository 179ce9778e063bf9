// ── Runtime hub configuration ──
//
// Describes how the hub runs: tuning, shared secrets and transport
// settings. Never touches disk; `opsdeck-config` builds one of these
// from files and environment and hands it in.

use std::time::Duration;

use opsdeck_api::TransportConfig;
use secrecy::SecretString;

/// Configuration for a [`Hub`](crate::Hub).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Delay between telemetry samples.
    pub sample_interval: Duration,
    /// Outbound queue depth per duplex connection. A subscriber whose queue
    /// is full when a relay arrives is dropped.
    pub subscriber_buffer: usize,
    /// Depth of the broker's command queue.
    pub broker_queue: usize,
    /// Shared key discovery agents present in `agent_auth`.
    pub agent_key: SecretString,
    /// HS256 secret for identity tokens.
    pub jwt_secret: SecretString,
    /// TLS and timeout settings for vendor connections.
    pub transport: TransportConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            subscriber_buffer: 64,
            broker_queue: 1024,
            agent_key: SecretString::from(String::new()),
            jwt_secret: SecretString::from(String::new()),
            transport: TransportConfig::default(),
        }
    }
}
