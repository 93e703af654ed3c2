use async_trait::async_trait;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    StatusCode,
};
use telemetry_core::{Metric, MetricKind, MetricRecord};
use telemetry_transport::{
    rpc::RpcClient, Endpoint, IncomingResponse, OutgoingRequest, RpcError, TransportError,
};
use thiserror::Error;
use tracing::debug;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain";

/// Errors that can occur while reporting metrics.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report could not be sent over HTTP.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The report could not be sent over RPC.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The report could not be encoded.
    #[error("failed to encode report: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The server answered with an error status.
    #[error("server responded with {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,

        /// Response body, as text.
        body: String,
    },
}

/// Sends metrics to the server.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Reports a single metric in its raw form: kind, name and unparsed value.
    async fn report_raw(&self, kind: MetricKind, name: &str, value: &str)
        -> Result<(), ReportError>;

    /// Reports a single metric.
    async fn report(&self, metric: Metric) -> Result<(), ReportError>;

    /// Reports a batch of metrics.
    async fn report_batch(&self, metrics: Vec<Metric>) -> Result<(), ReportError>;
}

/// Reports metrics over HTTP, through the transport chain.
pub struct HttpReporter {
    endpoint: Endpoint,
}

impl HttpReporter {
    /// Creates a reporter sending to `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        HttpReporter { endpoint }
    }

    async fn post(&self, request: OutgoingRequest) -> Result<(), ReportError> {
        let path = request.uri.path().to_owned();
        let IncomingResponse { status, body, .. } = self.endpoint.send(request).await?;
        debug!(%path, %status, "Report sent.");

        if status.is_success() {
            Ok(())
        } else {
            let body = String::from_utf8_lossy(&body).trim().to_owned();
            Err(ReportError::Status { status, body })
        }
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report_raw(
        &self,
        kind: MetricKind,
        name: &str,
        value: &str,
    ) -> Result<(), ReportError> {
        let uri = self.endpoint.uri(&format!("/update/{kind}/{name}/{value}"))?;
        let mut request = OutgoingRequest::post_empty(uri);
        request.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT));
        self.post(request).await
    }

    async fn report(&self, metric: Metric) -> Result<(), ReportError> {
        let body = serde_json::to_vec(&MetricRecord::from(metric))?;
        let uri = self.endpoint.uri("/update/")?;
        self.post(OutgoingRequest::post(uri, JSON, body)).await
    }

    async fn report_batch(&self, metrics: Vec<Metric>) -> Result<(), ReportError> {
        let body = serde_json::to_vec(&metrics)?;
        let uri = self.endpoint.uri("/updates/")?;
        self.post(OutgoingRequest::post(uri, JSON, body)).await
    }
}

/// Reports metrics over RPC.
pub struct RpcReporter {
    client: RpcClient,
}

impl RpcReporter {
    /// Creates a reporter calling through `client`.
    pub fn new(client: RpcClient) -> Self {
        RpcReporter { client }
    }
}

#[async_trait]
impl Reporter for RpcReporter {
    async fn report_raw(
        &self,
        kind: MetricKind,
        name: &str,
        value: &str,
    ) -> Result<(), ReportError> {
        Ok(self.client.report_raw(kind.as_str(), name, value).await?)
    }

    async fn report(&self, metric: Metric) -> Result<(), ReportError> {
        Ok(self.client.report(metric).await?)
    }

    async fn report_batch(&self, metrics: Vec<Metric>) -> Result<(), ReportError> {
        Ok(self.client.report_batch(metrics).await?)
    }
}
