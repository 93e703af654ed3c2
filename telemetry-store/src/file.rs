use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use telemetry_core::{Metric, MetricKind};
use tokio::{
    sync::Mutex,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::{Storage, StorageError};

struct Shared<S> {
    base: S,
    path: PathBuf,
    // Held from reading the state until the snapshot is in place, so snapshots land in order.
    writer: Mutex<()>,
}

impl<S: Storage> Shared<S> {
    fn new(base: S, path: PathBuf) -> Self {
        Shared { base, path, writer: Mutex::new(()) }
    }

    async fn persist(&self) -> Result<usize, StorageError> {
        let _writing = self.writer.lock().await;
        let metrics = self.base.get_all().await?;
        let encoded = serde_json::to_vec(&metrics)?;

        let mut staging = OsString::from(self.path.as_os_str());
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(metrics.len())
    }

    async fn persist_logged(&self) {
        match self.persist().await {
            Ok(count) => debug!(path = %self.path.display(), count, "Wrote metrics snapshot."),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to write metrics snapshot.")
            }
        }
    }

    async fn restore(&self) {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No metrics snapshot found, starting empty.");
                return;
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read metrics snapshot.");
                return;
            }
        };

        let entries = match serde_json::from_slice::<Vec<serde_json::Value>>(&contents) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Metrics snapshot is corrupt.");
                return;
            }
        };

        let mut restored = 0;
        for entry in entries {
            let metric = match serde_json::from_value::<Metric>(entry) {
                Ok(metric) => metric,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid entry in metrics snapshot.");
                    continue;
                }
            };
            match self.base.update_one(metric).await {
                Ok(()) => restored += 1,
                Err(e) => error!(error = %e, "Failed to restore metric."),
            }
        }
        info!(path = %self.path.display(), restored, "Restored metrics snapshot.");
    }
}

/// Persists the state of a store to a JSON file.
///
/// When the write interval is zero, the snapshot is rewritten after every successful update.
/// Otherwise, a background task rewrites it once per interval for as long as the store is alive.
/// Failing to write a snapshot is logged and never fails the update that triggered it.
///
/// Call [`flush`][FileStore::flush] before shutting down to avoid losing the updates made since
/// the last interval.
pub struct FileStore<S> {
    shared: Arc<Shared<S>>,
    interval: Duration,
    _stop: DropGuard,
}

impl<S: Storage + 'static> FileStore<S> {
    /// Wraps `base`, persisting its state to the file at `path`.
    ///
    /// If `restore` is `true`, the metrics in an existing file are first replayed into `base`.
    /// A missing or corrupt file is logged and skipped.
    ///
    /// When `interval` is not zero, this spawns the periodic writer and so must be called from
    /// within a Tokio runtime.
    pub async fn open<P>(base: S, path: P, interval: Duration, restore: bool) -> Self
    where
        P: Into<PathBuf>,
    {
        let shared = Arc::new(Shared::new(base, path.into()));
        if restore {
            shared.restore().await;
        }

        let token = CancellationToken::new();
        if !interval.is_zero() {
            tokio::spawn(run_snapshots(Arc::downgrade(&shared), interval, token.clone()));
        }

        FileStore { shared, interval, _stop: token.drop_guard() }
    }

    /// Writes the current state to the file immediately.
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be read, encoded or written.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let count = self.shared.persist().await?;
        info!(path = %self.shared.path.display(), count, "Flushed metrics snapshot.");
        Ok(())
    }

    /// Returns the path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    async fn after_update(&self) {
        if self.interval.is_zero() {
            self.shared.persist_logged().await;
        }
    }
}

async fn run_snapshots<S: Storage>(
    shared: Weak<Shared<S>>,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(store) = shared.upgrade() else { break };
        store.persist_logged().await;
    }
    debug!("Snapshot writer stopped.");
}

#[async_trait]
impl<S: Storage + 'static> Storage for FileStore<S> {
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        self.shared.base.get_all().await
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        self.shared.base.get_one(kind, name).await
    }

    async fn update_one(&self, metric: Metric) -> Result<(), StorageError> {
        self.shared.base.update_one(metric).await?;
        self.after_update().await;
        Ok(())
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        self.shared.base.update_batch(metrics).await?;
        self.after_update().await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.shared.base.ping().await
    }
}
