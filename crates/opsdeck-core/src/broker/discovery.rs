// ── Discovery feed ──
//
// One agent produces scan results for every connected admin console.
// Commands flow the other way: the server asks the agent to scan.

use serde::Serialize;

use super::{Broker, encode_frame};
use crate::error::CoreError;
use crate::model::ChannelId;

/// Command pushed to the discovery agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Run a scan of `kind` (e.g. `arp`, `ping`) against `target`.
    Scan { kind: String, target: String },
}

/// Ask the connected agent to run a scan.
///
/// Fails with [`CoreError::NoProducer`] if no agent is connected.
pub async fn request_scan(broker: &Broker, kind: &str, target: &str) -> Result<(), CoreError> {
    let command = AgentCommand::Scan {
        kind: kind.to_owned(),
        target: target.to_owned(),
    };
    broker
        .send_to_producer(ChannelId::Discovery, encode_frame(&command)?)
        .await
}
