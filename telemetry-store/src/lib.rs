//! Metric storage backends.
//!
//! Every backend implements [`Storage`], a uniform contract of point lookups, full listings,
//! single and batch updates, and a liveness check. All backends apply the same update rules:
//! counters accumulate every delta they receive, while gauges keep the most recent value.
//!
//! # Backends
//!
//! - [`MemoryStore`] keeps metrics in two maps behind a single reader/writer lock.
//! - [`SqliteStore`] keeps metrics in a SQLite table, applying batches transactionally.
//!
//! # Decorators
//!
//! Decorators wrap any other store:
//!
//! - [`FileStore`] snapshots the wrapped store to a JSON file, either after every update or on a
//!   fixed interval, and can restore a previous snapshot on startup.
//! - [`Retrying`], created through [`RetryLayer`], retries failed updates and pings with a fixed
//!   [`Backoff`][telemetry_core::Backoff] schedule.
//!
//! Decorators are composed with [`Stack`][telemetry_core::layers::Stack]:
//!
//! ```no_run
//! # async fn example() -> Result<(), telemetry_store::StorageError> {
//! use telemetry_core::{layers::Stack, Backoff};
//! use telemetry_store::{RetryLayer, SqliteStore, Storage};
//!
//! let store = Stack::new(SqliteStore::open("metrics.db").await?)
//!     .push(RetryLayer::new(Backoff::default()))
//!     .into_inner();
//! store.ping().await?;
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use telemetry_core::{Metric, MetricKind};

mod error;
pub use self::error::StorageError;

mod file;
pub use self::file::FileStore;

mod memory;
pub use self::memory::MemoryStore;

mod retry;
pub use self::retry::{RetryLayer, Retrying};

mod sqlite;
pub use self::sqlite::SqliteStore;

/// A metric store.
///
/// Dropping the future returned by any operation cancels it.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns every stored metric, in no particular order.
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError>;

    /// Returns the metric with the given kind and name, or `None` if it is not stored.
    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError>;

    /// Applies a single update.
    async fn update_one(&self, metric: Metric) -> Result<(), StorageError>;

    /// Applies a batch of updates, in order.
    ///
    /// Transactional backends apply either all or none of the updates.
    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for Arc<T> {
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        (**self).get_all().await
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        (**self).get_one(kind, name).await
    }

    async fn update_one(&self, metric: Metric) -> Result<(), StorageError> {
        (**self).update_one(metric).await
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        (**self).update_batch(metrics).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        (**self).ping().await
    }
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for Box<T> {
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        (**self).get_all().await
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        (**self).get_one(kind, name).await
    }

    async fn update_one(&self, metric: Metric) -> Result<(), StorageError> {
        (**self).update_one(metric).await
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        (**self).update_batch(metrics).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        (**self).ping().await
    }
}
