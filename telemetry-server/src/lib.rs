//! Telemetry server: receives metric reports and stores them.
//!
//! The server exposes the store over [HTTP][http] and, when enabled, over [RPC][rpc]. Both
//! interfaces share one [`Backend`], chosen from the [`ServerConfig`]:
//!
//! - a SQLite database with retried operations, when a database DSN is set
//! - an in-memory store snapshotted to a JSON file, when a file path is set
//! - an in-memory store otherwise
//!
//! [`run`] serves until its cancellation token fires, drains in-flight requests and flushes the
//! store before returning.
#![deny(missing_docs)]

use telemetry_transport::{crypto::Decrypter, Ingress};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod backend;
pub use self::backend::Backend;

mod config;
pub use self::config::ServerConfig;

mod error;
pub use self::error::ServeError;

pub mod http;
use self::http::HttpServer;

pub mod rpc;
use self::rpc::RpcServer;

/// Builds the ingress checks described by `config`.
///
/// # Errors
///
/// Fails if the trusted subnet is invalid or the private key cannot be loaded.
pub fn ingress(config: &ServerConfig) -> Result<Ingress, ServeError> {
    let mut ingress = Ingress::new().with_signing_key(config.key.clone());
    if let Some(subnet) = config.trusted_subnet()? {
        info!(%subnet, "Only accepting reports from the trusted subnet.");
        ingress = ingress.with_trusted_subnet(subnet);
    }
    if let Some(path) = &config.crypto_key {
        let decrypter = Decrypter::from_file(path).map_err(ServeError::PrivateKey)?;
        info!(path = %path.display(), "Decrypting encrypted reports.");
        ingress = ingress.with_decrypter(decrypter);
    }
    Ok(ingress)
}

/// Runs the server until `token` is cancelled.
///
/// If either interface fails, the other one is shut down as well.
///
/// # Errors
///
/// Fails if the storage backend cannot be opened, a listener cannot be bound, the ingress
/// checks cannot be set up, or in-flight requests do not complete in time during shutdown.
pub async fn run(config: ServerConfig, token: CancellationToken) -> Result<(), ServeError> {
    let ingress = ingress(&config)?;
    let backend = Backend::open(&config).await?;

    let mut servers = JoinSet::new();
    let http = HttpServer::bind(&config.address, backend.store(), ingress).await?;
    servers.spawn(http.serve(token.clone()));
    if config.use_grpc {
        let rpc = RpcServer::bind(&config.grpc_address, backend.store()).await?;
        servers.spawn(rpc.serve(token.clone()));
    }

    let mut result = Ok(());
    while let Some(joined) = servers.join_next().await {
        let outcome = joined.map_err(ServeError::from).and_then(|served| served);
        if let Err(e) = outcome {
            error!(error = %e, "Server stopped with an error.");
            token.cancel();
            if result.is_ok() {
                result = Err(e);
            }
        }
    }

    backend.close().await;
    result
}
