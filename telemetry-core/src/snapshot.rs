use std::collections::HashMap;

use crate::Metric;

/// A point-in-time copy of sampled counters and gauges.
///
/// Snapshots are created fresh on every read of a sampler and are consumed by converting them
/// into [`Metric`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
}

impl Snapshot {
    /// Creates a snapshot from counter and gauge maps.
    pub fn new(counters: HashMap<String, i64>, gauges: HashMap<String, f64>) -> Self {
        Snapshot { counters, gauges }
    }

    /// Returns the sampled counters.
    pub fn counters(&self) -> &HashMap<String, i64> {
        &self.counters
    }

    /// Returns the sampled gauges.
    pub fn gauges(&self) -> &HashMap<String, f64> {
        &self.gauges
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len()
    }

    /// Returns `true` if the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the snapshot, yielding one metric per entry, counters first.
    pub fn into_metrics(self) -> impl Iterator<Item = Metric> {
        let counters = self.counters.into_iter().map(|(name, delta)| Metric::counter(name, delta));
        let gauges = self.gauges.into_iter().map(|(name, value)| Metric::gauge(name, value));
        counters.chain(gauges)
    }
}
