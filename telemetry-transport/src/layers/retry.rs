use async_trait::async_trait;
use telemetry_core::{layers::Layer, Backoff};

use crate::{BoxTransport, IncomingResponse, OutgoingRequest, Transport, TransportError};

/// Retries requests that fail to reach the server.
///
/// Every attempt sends a clone of the original request, sharing the same immutable body. Error
/// statuses are responses and are never retried.
pub struct Retry {
    inner: BoxTransport,
    backoff: Backoff,
}

#[async_trait]
impl Transport for Retry {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        let name = request.uri.path().to_owned();
        self.backoff.retry(&name, || self.inner.send(request.clone())).await
    }
}

/// A layer for retrying requests.
#[derive(Clone, Debug, Default)]
pub struct RetryLayer {
    backoff: Backoff,
}

impl RetryLayer {
    /// Creates a new `RetryLayer` using the given schedule.
    pub fn new(backoff: Backoff) -> Self {
        RetryLayer { backoff }
    }
}

impl Layer<BoxTransport> for RetryLayer {
    type Output = BoxTransport;

    fn layer(&self, inner: BoxTransport) -> Self::Output {
        Box::new(Retry { inner, backoff: self.backoff.clone() })
    }
}
