//! Per-service metric counters with snapshot-and-reset packets.
//!
//! Every service owns a [`MetricsTracker`] keyed by its own metric enum.
//! Counters only grow within a snapshot window; [`MetricsTracker::get_and_reset_packet`]
//! returns the current values and zeroes the counters in one step so no
//! increment is counted twice across windows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A metric name drawn from a service's closed metric enumeration.
pub trait MetricName: Copy {
    /// The stable string used as the counter key in status packets.
    fn as_str(&self) -> &'static str;
}

/// A flat snapshot of counter values, serializable into a `STATUS` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPacket {
    /// Counter name to value, sorted by name for stable output.
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
}

/// Counter bag for one service.
///
/// Increments are cheap and may come from any task; the interior map is
/// guarded by a mutex because snapshot-and-reset must be atomic with
/// respect to concurrent increments.
#[derive(Debug, Default)]
pub struct MetricsTracker {
    counters: Mutex<BTreeMap<&'static str, u64>>,
}

impl MetricsTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn increment<M: MetricName>(&self, metric: M) {
        self.increment_by(metric, 1);
    }

    /// Increment a counter by an arbitrary amount.
    pub fn increment_by<M: MetricName>(&self, metric: M, amount: u64) {
        let mut counters = self.counters.lock().expect("metrics lock poisoned");
        *counters.entry(metric.as_str()).or_insert(0) += amount;
    }

    /// Snapshot the current counters and reset them to zero atomically.
    pub fn get_and_reset_packet(&self) -> MetricPacket {
        let mut counters = self.counters.lock().expect("metrics lock poisoned");
        let snapshot = counters
            .iter()
            .map(|(name, value)| ((*name).to_string(), *value))
            .collect();
        counters.clear();
        MetricPacket { counters: snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum TestMetric {
        Received,
        Sent,
    }

    impl MetricName for TestMetric {
        fn as_str(&self) -> &'static str {
            match self {
                TestMetric::Received => "received",
                TestMetric::Sent => "sent",
            }
        }
    }

    #[test]
    fn increments_accumulate() {
        let tracker = MetricsTracker::new();
        tracker.increment(TestMetric::Received);
        tracker.increment(TestMetric::Received);
        tracker.increment_by(TestMetric::Sent, 5);

        let packet = tracker.get_and_reset_packet();
        assert_eq!(packet.counters.get("received"), Some(&2));
        assert_eq!(packet.counters.get("sent"), Some(&5));
    }

    #[test]
    fn reset_zeroes_counters() {
        let tracker = MetricsTracker::new();
        tracker.increment(TestMetric::Received);

        let first = tracker.get_and_reset_packet();
        assert_eq!(first.counters.get("received"), Some(&1));

        let second = tracker.get_and_reset_packet();
        assert!(second.counters.is_empty());
    }

    #[test]
    fn packet_serializes_flat() {
        let tracker = MetricsTracker::new();
        tracker.increment_by(TestMetric::Sent, 3);

        let packet = tracker.get_and_reset_packet();
        let json = serde_json::to_value(&packet).expect("serialize");
        assert_eq!(json, serde_json::json!({"sent": 3}));
    }

    #[test]
    fn concurrent_increments_are_counted_once() {
        use std::sync::Arc;

        let tracker = Arc::new(MetricsTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    tracker.increment(TestMetric::Received);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread join");
        }

        let packet = tracker.get_and_reset_packet();
        assert_eq!(packet.counters.get("received"), Some(&800));
    }
}
