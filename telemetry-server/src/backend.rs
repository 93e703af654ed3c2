use std::sync::Arc;

use telemetry_core::{layers::Stack, Backoff};
use telemetry_store::{FileStore, MemoryStore, RetryLayer, SqliteStore, Storage, StorageError};
use tracing::{error, info};

use crate::ServerConfig;

/// The storage backend selected by the configuration.
///
/// - with a database DSN, a SQLite store whose operations are retried
/// - otherwise, with a file path, an in-memory store snapshotted to that file
/// - otherwise, an in-memory store
pub struct Backend {
    store: Arc<dyn Storage>,
    snapshots: Option<Arc<FileStore<MemoryStore>>>,
}

impl Backend {
    /// Opens the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened.
    pub async fn open(config: &ServerConfig) -> Result<Self, StorageError> {
        if !config.database_dsn.is_empty() {
            let store = Stack::new(SqliteStore::open(&config.database_dsn).await?)
                .push(RetryLayer::new(Backoff::default()))
                .into_inner();
            info!(dsn = %config.database_dsn, "Using SQLite storage.");
            return Ok(Backend::new(store));
        }

        if !config.file_storage_path.is_empty() {
            let store = Arc::new(
                FileStore::open(
                    MemoryStore::new(),
                    config.file_storage_path.clone(),
                    config.store_interval(),
                    config.restore,
                )
                .await,
            );
            info!(
                path = %config.file_storage_path,
                interval = config.store_interval,
                restore = config.restore,
                "Using file storage."
            );
            let snapshots = Some(Arc::clone(&store));
            return Ok(Backend { store, snapshots });
        }

        info!("Using in-memory storage.");
        Ok(Backend::new(MemoryStore::new()))
    }

    /// Wraps an arbitrary store.
    pub fn new<S: Storage + 'static>(store: S) -> Self {
        Backend { store: Arc::new(store), snapshots: None }
    }

    /// Returns a handle to the store.
    pub fn store(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.store)
    }

    /// Writes out any state not yet persisted.
    pub async fn close(&self) {
        if let Some(snapshots) = &self.snapshots {
            if let Err(e) = snapshots.flush().await {
                error!(error = %e, path = %snapshots.path().display(), "Failed to flush metrics.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use telemetry_core::{Metric, MetricKind};

    use super::Backend;
    use crate::ServerConfig;

    #[tokio::test]
    async fn test_memory_only() {
        let config = ServerConfig { file_storage_path: String::new(), ..ServerConfig::default() };
        let backend = Backend::open(&config).await.unwrap();
        assert!(backend.snapshots.is_none());

        backend.store().update_one(Metric::counter("hits", 2)).await.unwrap();
        let stored = backend.store().get_one(MetricKind::Counter, "hits").await.unwrap();
        assert_eq!(stored, Some(Metric::counter("hits", 2)));
    }

    #[tokio::test]
    async fn test_file_storage_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let config = ServerConfig {
            file_storage_path: path.to_str().unwrap().to_owned(),
            store_interval: 3600,
            restore: true,
            ..ServerConfig::default()
        };

        let backend = Backend::open(&config).await.unwrap();
        backend.store().update_one(Metric::gauge("temp", 3.5)).await.unwrap();
        assert!(!path.exists());
        backend.close().await;
        drop(backend);

        let reopened = Backend::open(&config).await.unwrap();
        let stored = reopened.store().get_all().await.unwrap();
        assert_eq!(stored, vec![Metric::gauge("temp", 3.5)]);
    }

    #[tokio::test]
    async fn test_database_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            database_dsn: dir.path().join("metrics.db").to_str().unwrap().to_owned(),
            ..ServerConfig::default()
        };

        let backend = Backend::open(&config).await.unwrap();
        assert!(backend.snapshots.is_none());
        backend.store().ping().await.unwrap();
        backend.store().update_batch(vec![Metric::counter("hits", 1)]).await.unwrap();
        backend.store().update_batch(vec![Metric::counter("hits", 4)]).await.unwrap();
        let stored = backend.store().get_one(MetricKind::Counter, "hits").await.unwrap();
        assert_eq!(stored, Some(Metric::counter("hits", 5)));
    }
}
