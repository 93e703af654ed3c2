//! RPC interface.
//!
//! Serves the length-delimited Protocol Buffers service from [`telemetry_transport::rpc`]: every
//! request frame is answered with exactly one response frame, in order, for as long as the
//! client keeps the connection open.
use std::{io, net::SocketAddr, sync::Arc};

use telemetry_core::{Metric, MetricError};
use telemetry_store::{Storage, StorageError};
use telemetry_transport::{
    rpc::{
        proto::{Method, ReportBatch, ReportMetric, ReportRawMetric, Request, Response},
        read_frame, write_frame, MAX_FRAME_LEN,
    },
    RpcError,
};
use thiserror::Error;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{http::SHUTDOWN_TIMEOUT, ServeError};

#[derive(Debug, Error)]
enum CallError {
    #[error("request carries no method")]
    MissingMethod,

    #[error("request carries no metric")]
    MissingMetric,

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Serves the RPC interface.
pub struct RpcServer {
    listener: TcpListener,
    store: Arc<dyn Storage>,
}

impl RpcServer {
    /// Binds the server to `address`.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(address: &str, store: Arc<dyn Storage>) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServeError::Bind { address: address.to_owned(), source })?;
        Ok(RpcServer { listener, store })
    }

    /// Returns the address the server is bound to.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be read from the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `token` is cancelled, then waits for calls in progress.
    ///
    /// # Errors
    ///
    /// Fails if calls in progress do not complete within [`SHUTDOWN_TIMEOUT`].
    pub async fn serve(self, token: CancellationToken) -> Result<(), ServeError> {
        if let Ok(address) = self.local_addr() {
            info!(%address, "Serving RPC.");
        }

        let connections = TaskTracker::new();
        loop {
            let (stream, peer) = tokio::select! {
                () = token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Error accepting connection. Ignoring.");
                        continue;
                    }
                },
            };

            let store = Arc::clone(&self.store);
            let token = token.clone();
            connections.spawn(async move {
                match serve_connection(stream, store.as_ref(), token).await {
                    Ok(()) => debug!(%peer, "RPC connection closed."),
                    Err(e) => warn!(%peer, error = %e, "RPC connection failed."),
                }
            });
        }

        drop(self.listener);
        info!("RPC server shutting down.");
        connections.close();
        tokio::time::timeout(SHUTDOWN_TIMEOUT, connections.wait())
            .await
            .map_err(|_| ServeError::ShutdownTimeout(SHUTDOWN_TIMEOUT))
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    store: &dyn Storage,
    token: CancellationToken,
) -> Result<(), RpcError> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    loop {
        let request = tokio::select! {
            () = token.cancelled() => return Ok(()),
            request = read_frame::<_, Request>(&mut reader, MAX_FRAME_LEN) => request?,
        };
        let Some(request) = request else {
            return Ok(());
        };

        let response = handle(store, request).await;
        write_frame(&mut writer, &response).await?;
    }
}

/// Applies a single call to `store`.
pub async fn handle(store: &dyn Storage, request: Request) -> Response {
    let result = match request.method {
        Some(Method::ReportRaw(report)) => report_raw(store, report).await,
        Some(Method::Report(report)) => report_one(store, report).await,
        Some(Method::ReportBatch(batch)) => report_batch(store, batch).await,
        None => Err(CallError::MissingMethod),
    };

    match result {
        Ok(()) => Response::success(),
        Err(e) => {
            error!(error = %e, "RPC call failed.");
            Response::failure(e)
        }
    }
}

async fn report_raw(store: &dyn Storage, report: ReportRawMetric) -> Result<(), CallError> {
    debug!(kind = %report.kind, key = %report.key, value = %report.value, "Received raw metric.");
    let metric = Metric::parse(&report.kind, &report.key, &report.value)?;
    Ok(store.update_one(metric).await?)
}

async fn report_one(store: &dyn Storage, report: ReportMetric) -> Result<(), CallError> {
    let metric = Metric::try_from(report.metric.ok_or(CallError::MissingMetric)?)?;
    debug!(name = metric.name(), kind = %metric.kind(), "Received metric.");
    Ok(store.update_one(metric).await?)
}

async fn report_batch(store: &dyn Storage, batch: ReportBatch) -> Result<(), CallError> {
    debug!(count = batch.metrics.len(), "Received batch.");
    let metrics =
        batch.metrics.into_iter().map(Metric::try_from).collect::<Result<Vec<_>, _>>()?;
    Ok(store.update_batch(metrics).await?)
}
