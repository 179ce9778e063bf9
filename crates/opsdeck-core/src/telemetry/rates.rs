// Counter deltas to rates, and the messages pushed to a traffic subscriber.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::counters::InterfaceCounters;

/// Bits transferred during one sampling interval.
///
/// Signed: a counter reset produces a negative value, passed through as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub rx_bps: i64,
    pub tx_bps: i64,
}

/// Messages on the traffic stream, serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TrafficMessage {
    /// Sent once, before any update: the interfaces being watched.
    InterfacesList(Vec<String>),
    /// Rates for the interfaces present in both of the last two samples.
    TrafficUpdate(BTreeMap<String, Rate>),
}

/// `(current - previous) * 8`, saturating at the `i64` range.
fn bits(current: u64, previous: u64) -> i64 {
    let delta = (i128::from(current) - i128::from(previous)) * 8;
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

/// Turns successive counter samples into per-interval rates.
#[derive(Debug, Clone)]
pub struct RateTracker {
    watched: BTreeSet<String>,
    previous: Option<HashMap<String, (u64, u64)>>,
}

impl RateTracker {
    pub fn new(watched: impl IntoIterator<Item = String>) -> Self {
        Self {
            watched: watched.into_iter().collect(),
            previous: None,
        }
    }

    /// Record a sample and return the rates it yields.
    ///
    /// The first sample only establishes a baseline and yields `None`. Later
    /// samples yield rates for watched interfaces present in both this and
    /// the previous sample, which may be an empty map.
    pub fn observe(&mut self, sample: &[InterfaceCounters]) -> Option<BTreeMap<String, Rate>> {
        let current: HashMap<String, (u64, u64)> = sample
            .iter()
            .map(|c| (c.name.clone(), (c.rx_bytes, c.tx_bytes)))
            .collect();

        let rates = self.previous.as_ref().map(|previous| {
            self.watched
                .iter()
                .filter_map(|name| {
                    let (rx, tx) = current.get(name)?;
                    let (prev_rx, prev_tx) = previous.get(name)?;
                    Some((
                        name.clone(),
                        Rate {
                            rx_bps: bits(*rx, *prev_rx),
                            tx_bps: bits(*tx, *prev_tx),
                        },
                    ))
                })
                .collect()
        });

        self.previous = Some(current);
        rates
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn counters(name: &str, rx: u64, tx: u64) -> InterfaceCounters {
        InterfaceCounters {
            name: name.into(),
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    #[test]
    fn first_sample_is_baseline_only() {
        let mut tracker = RateTracker::new(["eth0".to_owned()]);
        assert_eq!(tracker.observe(&[counters("eth0", 1000, 0)]), None);
    }

    #[test]
    fn eth0_1000_to_1500_is_4000_bits() {
        let mut tracker = RateTracker::new(["eth0".to_owned()]);
        tracker.observe(&[counters("eth0", 1000, 200)]);
        let rates = tracker.observe(&[counters("eth0", 1500, 200)]).unwrap();
        assert_eq!(
            rates.get("eth0"),
            Some(&Rate {
                rx_bps: 4000,
                tx_bps: 0
            })
        );
    }

    #[test]
    fn counter_reset_passes_through_negative() {
        let mut tracker = RateTracker::new(["eth0".to_owned()]);
        tracker.observe(&[counters("eth0", 500, 10)]);
        let rates = tracker.observe(&[counters("eth0", 100, 10)]).unwrap();
        assert_eq!(rates["eth0"].rx_bps, -3200);
    }

    #[test]
    fn only_watched_names_present_in_both_samples() {
        let mut tracker = RateTracker::new(["eth0".to_owned(), "eth1".to_owned()]);
        tracker.observe(&[counters("eth0", 0, 0), counters("wlan0", 0, 0)]);
        let rates = tracker
            .observe(&[
                counters("eth0", 1, 1),
                counters("eth1", 5, 5),
                counters("wlan0", 9, 9),
            ])
            .unwrap();
        assert_eq!(rates.keys().collect::<Vec<_>>(), ["eth0"]);

        // eth1 now has a predecessor.
        let rates = tracker.observe(&[counters("eth1", 6, 5)]).unwrap();
        assert_eq!(rates.keys().collect::<Vec<_>>(), ["eth1"]);
    }

    #[test]
    fn extreme_deltas_saturate() {
        assert_eq!(bits(u64::MAX, 0), i64::MAX);
        assert_eq!(bits(0, u64::MAX), i64::MIN);
    }

    #[test]
    fn message_wire_shape() {
        let list = TrafficMessage::InterfacesList(vec!["ether1".into()]);
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            serde_json::json!({ "type": "interfaces_list", "data": ["ether1"] })
        );

        let mut rates = BTreeMap::new();
        rates.insert(
            "ether1".to_owned(),
            Rate {
                rx_bps: 8,
                tx_bps: 16,
            },
        );
        assert_eq!(
            serde_json::to_value(TrafficMessage::TrafficUpdate(rates)).unwrap(),
            serde_json::json!({
                "type": "traffic_update",
                "data": { "ether1": { "rx_bps": 8, "tx_bps": 16 } }
            })
        );
    }
}
