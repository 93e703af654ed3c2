//! Telemetry agent: samples process and host statistics and reports them to a server.
//!
//! The agent runs three loops until shut down:
//!
//! - two [`Sampler`] loops, polling runtime and host statistics every poll interval
//! - a [`Worker`] loop, reporting a snapshot of the sampler every report interval through a pool
//!   of senders
//!
//! Reports go over HTTP through the transport chain of [`telemetry_transport`], or over RPC when
//! configured to.
#![deny(missing_docs)]

use std::sync::Arc;

use telemetry_core::Backoff;
use telemetry_transport::{rpc::RpcClient, BuildError, TransportBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
pub use self::config::AgentConfig;

/// Reporters that deliver snapshots to the server.
pub mod reporter;
use self::reporter::{HttpReporter, Reporter, RpcReporter};

pub mod sampler;
use self::sampler::Sampler;

pub mod worker;
use self::worker::Worker;

/// Builds the reporter described by `config`.
///
/// # Errors
///
/// Fails if the server address is invalid or the public key cannot be loaded.
pub fn reporter(config: &AgentConfig) -> Result<Arc<dyn Reporter>, BuildError> {
    if config.use_grpc {
        info!(address = %config.grpc_address, "Reporting over RPC.");
        let client = RpcClient::new(config.grpc_address.clone(), Backoff::default())
            .with_max_connections(config.rate_limit);
        return Ok(Arc::new(RpcReporter::new(client)));
    }

    let mut builder =
        TransportBuilder::new(config.address.clone()).with_signing_key(config.key.clone());
    if let Some(path) = &config.crypto_key {
        builder = builder.with_public_key_file(path)?;
    }
    info!(
        address = %config.address,
        signed = !config.key.is_empty(),
        encrypted = config.crypto_key.is_some(),
        "Reporting over HTTP."
    );
    Ok(Arc::new(HttpReporter::new(builder.build()?)))
}

/// Runs the agent until `token` is cancelled.
///
/// # Errors
///
/// Fails if the reporter cannot be built.
pub async fn run(config: AgentConfig, token: CancellationToken) -> Result<(), BuildError> {
    let reporter = reporter(&config)?;

    let sampler = Arc::new(Sampler::new());
    let sampling = sampler.spawn(config.poll_interval(), &token);

    let worker = Worker::new(sampler, reporter, config.report_interval(), config.rate_limit);
    worker.run(token).await;

    for handle in sampling {
        if let Err(e) = handle.await {
            warn!(error = %e, "Sampling task failed.");
        }
    }
    Ok(())
}
