use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use telemetry_core::{Metric, MetricKind, MetricValue};

use crate::{Storage, StorageError};

#[derive(Default)]
struct Maps {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
}

impl Maps {
    fn apply(&mut self, metric: Metric) {
        let (name, value) = metric.into_parts();
        match value {
            MetricValue::Counter(delta) => {
                let stored = self.counters.entry(name).or_insert(0);
                *stored = stored.wrapping_add(delta);
            }
            MetricValue::Gauge(value) => {
                self.gauges.insert(name, value);
            }
        }
    }
}

/// In-memory metric storage.
///
/// Counters and gauges live in two maps guarded by a single reader/writer lock, which is held for
/// the duration of each operation. Counter accumulation wraps on overflow.
#[derive(Default)]
pub struct MemoryStore {
    maps: RwLock<Maps>,
}

impl MemoryStore {
    /// Creates an empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `MemoryStore` seeded with the given metrics, applied in order.
    pub fn with_metrics<I>(metrics: I) -> Self
    where
        I: IntoIterator<Item = Metric>,
    {
        let mut maps = Maps::default();
        for metric in metrics {
            maps.apply(metric);
        }
        MemoryStore { maps: RwLock::new(maps) }
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        let maps = self.maps.read();
        let counters =
            maps.counters.iter().map(|(name, delta)| Metric::counter(name.clone(), *delta));
        let gauges = maps.gauges.iter().map(|(name, value)| Metric::gauge(name.clone(), *value));
        Ok(counters.chain(gauges).collect())
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        let maps = self.maps.read();
        let metric = match kind {
            MetricKind::Counter => {
                maps.counters.get(name).map(|delta| Metric::counter(name, *delta))
            }
            MetricKind::Gauge => maps.gauges.get(name).map(|value| Metric::gauge(name, *value)),
        };
        Ok(metric)
    }

    async fn update_one(&self, metric: Metric) -> Result<(), StorageError> {
        self.maps.write().apply(metric);
        Ok(())
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        let mut maps = self.maps.write();
        for metric in metrics {
            maps.apply(metric);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};
    use telemetry_core::{Metric, MetricKind};

    use super::MemoryStore;
    use crate::Storage;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("failed to build runtime")
            .block_on(future)
    }

    #[tokio::test]
    async fn test_same_name_different_kinds() {
        let store = MemoryStore::new();
        store.update_one(Metric::counter("x", 2)).await.unwrap();
        store.update_one(Metric::gauge("x", 1.5)).await.unwrap();

        assert_eq!(
            store.get_one(MetricKind::Counter, "x").await.unwrap(),
            Some(Metric::counter("x", 2))
        );
        assert_eq!(
            store.get_one(MetricKind::Gauge, "x").await.unwrap(),
            Some(Metric::gauge("x", 1.5))
        );
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_absent_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get_one(MetricKind::Counter, "missing").await.unwrap(), None);
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_seeded() {
        let store = MemoryStore::with_metrics(vec![
            Metric::counter("a", 1),
            Metric::counter("a", 2),
            Metric::gauge("b", 4.0),
        ]);
        assert_eq!(
            store.get_one(MetricKind::Counter, "a").await.unwrap(),
            Some(Metric::counter("a", 3))
        );
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_counter_wraps_on_overflow() {
        let store = MemoryStore::new();
        store.update_one(Metric::counter("big", i64::MAX)).await.unwrap();
        store.update_one(Metric::counter("big", 1)).await.unwrap();
        assert_eq!(
            store.get_one(MetricKind::Counter, "big").await.unwrap(),
            Some(Metric::counter("big", i64::MIN))
        );
    }

    proptest! {
        #[test]
        fn property_counter_sums(deltas in arb_vec(-1_000_000i64..1_000_000, 0..64)) {
            let store = MemoryStore::new();
            let stored = block_on(async {
                for delta in &deltas {
                    store.update_one(Metric::counter("c", *delta)).await.unwrap();
                }
                store.get_one(MetricKind::Counter, "c").await.unwrap()
            });

            let expected = (!deltas.is_empty()).then(|| Metric::counter("c", deltas.iter().sum()));
            prop_assert_eq!(stored, expected);
        }

        #[test]
        fn property_gauge_last_write_wins(values in arb_vec(-1.0e9f64..1.0e9, 1..64)) {
            let store = MemoryStore::new();
            let metrics = values.iter().map(|value| Metric::gauge("g", *value)).collect();
            let stored = block_on(async {
                store.update_batch(metrics).await.unwrap();
                store.get_one(MetricKind::Gauge, "g").await.unwrap()
            });

            prop_assert_eq!(stored, values.last().map(|value| Metric::gauge("g", *value)));
        }
    }
}
