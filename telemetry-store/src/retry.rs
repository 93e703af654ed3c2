use async_trait::async_trait;
use telemetry_core::{layers::Layer, Backoff, Metric, MetricKind};

use crate::{Storage, StorageError};

/// Retries the fallible mutating operations of a store.
///
/// `update_one`, `update_batch` and `ping` are retried according to the configured [`Backoff`].
/// Reads pass straight through.
pub struct Retrying<S> {
    inner: S,
    backoff: Backoff,
}

impl<S> Retrying<S> {
    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Storage> Storage for Retrying<S> {
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        self.inner.get_all().await
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        self.inner.get_one(kind, name).await
    }

    async fn update_one(&self, metric: Metric) -> Result<(), StorageError> {
        self.backoff.retry("update_one", || self.inner.update_one(metric.clone())).await
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        self.backoff.retry("update_batch", || self.inner.update_batch(metrics.clone())).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.backoff.retry("ping", || self.inner.ping()).await
    }
}

/// A layer for retrying store operations.
#[derive(Clone, Debug, Default)]
pub struct RetryLayer {
    backoff: Backoff,
}

impl RetryLayer {
    /// Creates a new `RetryLayer` using the given schedule.
    pub fn new(backoff: Backoff) -> Self {
        RetryLayer { backoff }
    }
}

impl<S: Storage> Layer<S> for RetryLayer {
    type Output = Retrying<S>;

    fn layer(&self, inner: S) -> Self::Output {
        Retrying { inner, backoff: self.backoff.clone() }
    }
}
