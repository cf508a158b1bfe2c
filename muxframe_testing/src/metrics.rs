//! Reading `metrics` emitted by `muxframe` through a
//! [`DebuggingRecorder`].
//!
//! Taking a snapshot resets every counter and gauge in the recorder, so
//! [`MetricReadings`] folds each snapshot into running totals and tests query
//! those instead of the recorder.

use std::collections::HashMap;

use metrics::Key;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

/// Running totals of the counters and gauges seen by a recorder.
pub struct MetricReadings {
    snapshotter: Snapshotter,
    counters: HashMap<Key, u64>,
    gauges: HashMap<Key, f64>,
}

impl MetricReadings {
    /// Start reading from `snapshotter` with nothing recorded yet.
    #[must_use]
    pub fn new(snapshotter: Snapshotter) -> Self {
        Self {
            snapshotter,
            counters: HashMap::new(),
            gauges: HashMap::new(),
        }
    }

    /// Take one snapshot and add it to the totals.
    ///
    /// Gauges are only ever incremented and decremented by `muxframe`, so the
    /// value read after a reset is the change since the previous snapshot.
    pub fn refresh(&mut self) -> &mut Self {
        for (key, _, _, value) in self.snapshotter.snapshot().into_vec() {
            let key = key.key().clone();
            match value {
                DebugValue::Counter(n) => *self.counters.entry(key).or_default() += n,
                DebugValue::Gauge(g) => *self.gauges.entry(key).or_default() += g.into_inner(),
                DebugValue::Histogram(_) => {}
            }
        }
        self
    }

    /// Sum of the counters named `name` carrying every label in `labels`.
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .iter()
            .filter(|(key, _)| key_matches(key, name, labels))
            .map(|(_, n)| *n)
            .sum()
    }

    /// Value of the gauge named `name` carrying every label in `labels`, or
    /// `None` if it was never touched.
    #[must_use]
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .iter()
            .find(|(key, _)| key_matches(key, name, labels))
            .map(|(_, g)| *g)
    }
}

fn key_matches(key: &Key, name: &str, labels: &[(&str, &str)]) -> bool {
    key.name() == name
        && labels
            .iter()
            .all(|(k, v)| key.labels().any(|l| l.key() == *k && l.value() == *v))
}

/// Run `f` with a fresh [`DebuggingRecorder`] installed on this thread and
/// return what it recorded.
///
/// Only metrics emitted on the calling thread are captured, so `f` should
/// call the helpers directly rather than through an endpoint's I/O thread.
pub fn with_recorder<R>(f: impl FnOnce() -> R) -> (R, MetricReadings) {
    let recorder = DebuggingRecorder::new();
    let mut readings = MetricReadings::new(recorder.snapshotter());
    let out = metrics::with_local_recorder(&recorder, f);
    readings.refresh();
    (out, readings)
}
