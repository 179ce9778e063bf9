// ── Telemetry poller ──
//
// One sampling loop per traffic subscriber. Each loop owns a dedicated
// connection for its whole life and closes it on every exit path.

mod counters;
mod rates;

use std::sync::Arc;
use std::time::Duration;

use opsdeck_api::ProtocolKind;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedicated::{DedicatedConnection, DedicatedConnectionFactory};
use crate::error::CoreError;
use crate::model::Target;

pub use counters::InterfaceCounters;
pub use rates::{Rate, RateTracker, TrafficMessage};

/// Why a stream stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The subscriber's receiving side went away.
    SubscriberGone,
    /// The caller cancelled the stream.
    Cancelled,
}

/// Runs per-subscriber traffic sampling loops.
#[derive(Debug, Clone)]
pub struct TelemetryPoller {
    factory: Arc<DedicatedConnectionFactory>,
    interval: Duration,
}

impl TelemetryPoller {
    pub fn new(factory: Arc<DedicatedConnectionFactory>, interval: Duration) -> Self {
        Self { factory, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stream interface rates for `target` into `sink` until the subscriber
    /// goes away, `cancel` fires, or a sample fails.
    ///
    /// Opening the dedicated connection can fail with
    /// [`CoreError::ConnectionFailed`]; any later read failure ends the
    /// stream with [`CoreError::SamplingFailed`].
    pub async fn start_stream(
        &self,
        target: &Target,
        sink: mpsc::Sender<TrafficMessage>,
        cancel: CancellationToken,
    ) -> Result<StreamEnd, CoreError> {
        if target.kind != ProtocolKind::RouterOs {
            return Err(CoreError::Config {
                message: format!("traffic telemetry is not available for {} targets", target.kind),
            });
        }

        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            conn = self.factory.open(target) => conn?,
        };
        info!(target_id = %target.id, "traffic stream started");

        let result = self.run(target, &conn, &sink, &cancel).await;
        conn.close().await;

        match &result {
            Ok(end) => info!(target_id = %target.id, ?end, "traffic stream ended"),
            Err(e) => warn!(target_id = %target.id, error = %e, "traffic stream failed"),
        }
        result
    }

    async fn run(
        &self,
        target: &Target,
        conn: &DedicatedConnection,
        sink: &mpsc::Sender<TrafficMessage>,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, CoreError> {
        let sampling_failed = |reason: String| CoreError::SamplingFailed {
            target: target.name.clone(),
            reason,
        };

        let names = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            () = sink.closed() => return Ok(StreamEnd::SubscriberGone),
            names = counters::list_interfaces(conn) => names.map_err(sampling_failed)?,
        };
        debug!(target_id = %target.id, interfaces = names.len(), "enumerated interfaces");

        if sink
            .send(TrafficMessage::InterfacesList(names.clone()))
            .await
            .is_err()
        {
            return Ok(StreamEnd::SubscriberGone);
        }

        let mut tracker = RateTracker::new(names);

        loop {
            let sample = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                () = sink.closed() => return Ok(StreamEnd::SubscriberGone),
                sample = counters::sample(conn) => sample.map_err(sampling_failed)?,
            };

            if let Some(rates) = tracker.observe(&sample) {
                if !rates.is_empty()
                    && sink.send(TrafficMessage::TrafficUpdate(rates)).await.is_err()
                {
                    return Ok(StreamEnd::SubscriberGone);
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                () = sink.closed() => return Ok(StreamEnd::SubscriberGone),
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
