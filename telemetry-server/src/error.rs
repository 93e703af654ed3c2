use std::{io, time::Duration};

use telemetry_core::config::ConfigError;
use telemetry_store::StorageError;
use telemetry_transport::KeyError;
use thiserror::Error;

/// Errors that can occur while starting or running the server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The storage backend could not be opened.
    #[error("failed to open storage: {0}")]
    Storage(#[from] StorageError),

    /// The private key could not be loaded.
    #[error("failed to load private key: {0}")]
    PrivateKey(#[source] KeyError),

    /// A listener could not be bound.
    #[error("failed to listen on {address}: {source}")]
    Bind {
        /// The address that could not be bound.
        address: String,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// In-flight requests did not complete in time after shutdown was requested.
    #[error("in-flight requests did not complete within {0:?} of shutdown")]
    ShutdownTimeout(Duration),

    /// A server task panicked.
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
