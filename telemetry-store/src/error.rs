use thiserror::Error;

/// Errors that can occur while reading or writing metrics.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database rejected a statement or could not be reached.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A blocking database task panicked or was cancelled.
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Reading or writing a snapshot file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("failed to encode or decode snapshot: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored row could not be turned back into a metric.
    #[error("corrupt stored metric '{name}': {reason}")]
    Corrupt {
        /// Name of the offending row.
        name: String,

        /// What was wrong with it.
        reason: String,
    },
}
