use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::{IncomingResponse, OutgoingRequest, Transport, TransportError};

/// The end of the transport chain: sends requests over HTTP/1.
#[derive(Clone)]
pub struct HttpSender {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpSender {
    /// Creates a new `HttpSender` with its own connection pool.
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build_http();
        HttpSender { client }
    }
}

impl Default for HttpSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpSender {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        let OutgoingRequest { method, uri, headers, body } = request;

        let mut req = Request::new(Full::new(body.unwrap_or_default()));
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;

        let response = self.client.request(req).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(IncomingResponse { status: parts.status, headers: parts.headers, body })
    }
}
