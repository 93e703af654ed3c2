use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use telemetry_core::{Metric, MetricKind, MetricRecord};
use tracing::debug;

use crate::{Storage, StorageError};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        id          VARCHAR(255) NOT NULL,
        type        VARCHAR(50)  NOT NULL,
        value_delta BIGINT,
        value_gauge DOUBLE PRECISION,
        PRIMARY KEY (id, type)
    )";

const UPSERT: &str = "
    INSERT INTO metrics (id, type, value_delta, value_gauge)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (id, type) DO UPDATE SET
        value_delta = CASE
            WHEN metrics.type <> 'counter' THEN excluded.value_delta
            WHEN excluded.value_delta > 0
                AND metrics.value_delta > 9223372036854775807 - excluded.value_delta
                THEN (metrics.value_delta - 9223372036854775807 - 1)
                    + (excluded.value_delta - 9223372036854775807 - 1)
            WHEN excluded.value_delta < 0
                AND metrics.value_delta < (-9223372036854775807 - 1) - excluded.value_delta
                THEN (metrics.value_delta + 9223372036854775807 + 1)
                    + (excluded.value_delta + 9223372036854775807 + 1)
            ELSE metrics.value_delta + excluded.value_delta
        END,
        value_gauge = excluded.value_gauge";

const SELECT_ALL: &str = "SELECT id, type, value_delta, value_gauge FROM metrics";

const SELECT_ONE: &str =
    "SELECT id, type, value_delta, value_gauge FROM metrics WHERE id = ?1 AND type = ?2";

/// Durable metric storage backed by SQLite.
///
/// Every batch update runs in a single transaction: if any statement fails, the whole batch is
/// rolled back. Counter accumulation happens inside the upsert statement itself and wraps on
/// overflow, like [`MemoryStore`][crate::MemoryStore], since SQLite would otherwise store an
/// overflowing sum as a floating-point value.
///
/// Database calls are blocking, so they run on Tokio's blocking thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens the database at `dsn` and creates the metrics table if it does not exist.
    ///
    /// `dsn` is a file path, or `:memory:` for a private in-memory database.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or the table cannot be created.
    pub async fn open(dsn: &str) -> Result<Self, StorageError> {
        let dsn = dsn.to_owned();
        let conn = tokio::task::spawn_blocking(move || Connection::open(dsn)).await??;
        Self::from_connection(conn).await
    }

    /// Wraps an already open connection, creating the metrics table if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the table cannot be created.
    pub async fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = SqliteStore { conn: Arc::new(Mutex::new(conn)) };
        store
            .with_connection(|conn| {
                conn.execute_batch(CREATE_TABLE)?;
                Ok(())
            })
            .await?;
        debug!("Metrics table ready.");
        Ok(store)
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await?
    }
}

fn upsert(conn: &Connection, metric: &Metric) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(UPSERT)?;
    stmt.execute(params![
        metric.name(),
        metric.kind().as_str(),
        metric.delta(),
        metric.gauge_value()
    ])
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<MetricRecord> {
    let kind: String = row.get(1)?;
    // Only the payload column matching the kind is meaningful.
    let (delta, value) = if kind == MetricKind::Counter.as_str() {
        (row.get(2)?, None)
    } else {
        (None, row.get(3)?)
    };
    Ok(MetricRecord { id: row.get(0)?, kind, delta, value })
}

fn into_metric(record: MetricRecord) -> Result<Metric, StorageError> {
    let name = record.id.clone();
    Metric::try_from(record).map_err(|e| StorageError::Corrupt { name, reason: e.to_string() })
}

#[async_trait]
impl Storage for SqliteStore {
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(SELECT_ALL)?;
            let records = stmt.query_map([], read_row)?.collect::<Result<Vec<_>, _>>()?;
            records.into_iter().map(into_metric).collect()
        })
        .await
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        let name = name.to_owned();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare_cached(SELECT_ONE)?;
            let record = stmt.query_row(params![name, kind.as_str()], read_row).optional()?;
            record.map(into_metric).transpose()
        })
        .await
    }

    async fn update_one(&self, metric: Metric) -> Result<(), StorageError> {
        self.with_connection(move |conn| {
            upsert(conn, &metric)?;
            Ok(())
        })
        .await
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        self.with_connection(move |conn| {
            // Dropping the transaction without committing rolls it back.
            let tx = conn.transaction()?;
            for metric in &metrics {
                upsert(&tx, metric)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
