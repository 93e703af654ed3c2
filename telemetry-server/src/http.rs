//! HTTP interface.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `GET` | `/ping` | checks that the store is reachable |
//! | `GET` | `/value/{kind}/{name}` | fetches a metric's value as plain text |
//! | `GET` | `/` | lists every metric as HTML |
//! | `POST` | `/update/{kind}/{name}/{value}` | updates a metric from its path-encoded parts |
//! | `POST` | `/value/` | fetches a metric as JSON |
//! | `POST` | `/update/` | updates a metric from JSON and returns the stored metric |
//! | `POST` | `/updates/` | updates a batch of metrics from JSON |
//!
//! Every request goes through [`Ingress`] first. Large, compressible responses are gzipped for
//! clients that accept it.
use std::{borrow::Cow, convert::Infallible, io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{
    body::{Body as _, Incoming},
    header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown};
use quanta::Instant;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use telemetry_core::{Metric, MetricKind, MetricRecord};
use telemetry_store::Storage;
use telemetry_transport::{
    layers::{gzip, is_compressible, MIN_COMPRESSIBLE_LEN},
    rpc::MAX_FRAME_LEN,
    Ingress,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ServeError;

/// How long in-flight requests may take to complete once shutdown is requested.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest request body accepted, as received on the wire. Longer bodies are answered with
/// `413 Payload Too Large`.
pub const MAX_BODY_LEN: usize = MAX_FRAME_LEN;

const JSON: &str = "application/json";
const HTML: &str = "text/html; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";

/// Serves the HTTP interface.
pub struct HttpServer {
    listener: TcpListener,
    handler: Arc<Handler>,
}

impl HttpServer {
    /// Binds the server to `address`.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(
        address: &str,
        store: Arc<dyn Storage>,
        ingress: Ingress,
    ) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServeError::Bind { address: address.to_owned(), source })?;
        Ok(HttpServer { listener, handler: Arc::new(Handler { store, ingress }) })
    }

    /// Returns the address the server is bound to.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be read from the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `token` is cancelled, then waits for in-flight requests.
    ///
    /// # Errors
    ///
    /// Fails if in-flight requests do not complete within [`SHUTDOWN_TIMEOUT`].
    pub async fn serve(self, token: CancellationToken) -> Result<(), ServeError> {
        if let Ok(address) = self.local_addr() {
            info!(%address, "Serving HTTP.");
        }

        let graceful = GracefulShutdown::new();
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

            let handler = Arc::clone(&self.handler);
            let service = service_fn(move |request: Request<Incoming>| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, Infallible>(handler.handle(request).await) }
            });

            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            let connection = graceful.watch(connection);
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(%peer, error = %e, "Error serving connection.");
                }
            });
        }

        drop(self.listener);
        info!("HTTP server shutting down.");
        tokio::select! {
            () = graceful.shutdown() => Ok(()),
            () = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
                Err(ServeError::ShutdownTimeout(SHUTDOWN_TIMEOUT))
            }
        }
    }
}

#[derive(Deserialize)]
struct Lookup {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// A response, before it is compressed and turned into a [`Response`].
struct Reply {
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
}

impl Reply {
    fn empty(status: StatusCode) -> Self {
        Reply { status, content_type: None, body: Bytes::new() }
    }

    fn text(body: String) -> Self {
        Reply { status: StatusCode::OK, content_type: Some(TEXT), body: body.into() }
    }

    fn html(body: String) -> Self {
        Reply { status: StatusCode::OK, content_type: Some(HTML), body: body.into() }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                Reply { status: StatusCode::OK, content_type: Some(JSON), body: body.into() }
            }
            Err(e) => Reply::error(StatusCode::INTERNAL_SERVER_ERROR, e),
        }
    }

    fn error<E: ToString>(status: StatusCode, error: E) -> Self {
        let error = error.to_string();
        let body = serde_json::to_vec(&ErrorBody { error: &error }).unwrap_or_default();
        Reply { status, content_type: Some(JSON), body: body.into() }
    }

    fn into_response(self, accepts_gzip: bool) -> Response<Full<Bytes>> {
        let mut body = self.body;
        let mut gzipped = false;
        let compressible = self.content_type.is_some_and(is_compressible);
        if accepts_gzip && compressible && body.len() >= MIN_COMPRESSIBLE_LEN {
            match gzip(&body) {
                Ok(compressed) => {
                    body = compressed.into();
                    gzipped = true;
                }
                Err(e) => warn!(error = %e, "Failed to compress response. Sending as is."),
            }
        }

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        if let Some(content_type) = self.content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if gzipped {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        response
    }
}

struct Handler {
    store: Arc<dyn Storage>,
    ingress: Ingress,
}

impl Handler {
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let start = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let accepts_gzip = accepts_gzip(request.headers());

        let reply = self.dispatch(request).await;
        let status = reply.status;
        let response = reply.into_response(accepts_gzip);

        info!(
            %method,
            %path,
            status = status.as_u16(),
            size = response.body().size_hint().exact().unwrap_or_default(),
            duration = ?Instant::now().duration_since(start),
            "Handled request."
        );
        response
    }

    async fn dispatch(&self, request: Request<Incoming>) -> Reply {
        let (mut parts, body) = request.into_parts();
        if let Err(rejection) = self.ingress.check_source(&parts.headers) {
            return Reply::error(rejection.status(), rejection);
        }

        let body = match Limited::new(body, MAX_BODY_LEN).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return Reply::error(StatusCode::PAYLOAD_TOO_LARGE, e)
            }
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };
        let body = match self.ingress.open_body(&mut parts.headers, body) {
            Ok(body) => body,
            Err(rejection) => return Reply::error(rejection.status(), rejection),
        };

        let path = parts.uri.path();
        let segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
        match (&parts.method, segments.as_slice()) {
            (&Method::GET, [""]) => self.list().await,
            (&Method::GET, ["ping"]) => self.ping().await,
            (&Method::GET, ["value", kind, name]) if !name.is_empty() => {
                self.value(kind, name).await
            }
            (&Method::POST, ["update", kind, name, value])
                if !name.is_empty() && !value.is_empty() =>
            {
                self.update_raw(kind, name, value).await
            }
            (&Method::POST, ["value", ""]) => match json_body(&parts.headers, &body) {
                Ok(lookup) => self.value_json(lookup).await,
                Err(reply) => reply,
            },
            (&Method::POST, ["update", ""]) => match json_body(&parts.headers, &body) {
                Ok(record) => self.update_json(record).await,
                Err(reply) => reply,
            },
            (&Method::POST, ["updates", ""]) => match json_body(&parts.headers, &body) {
                Ok(records) => self.update_batch(records).await,
                Err(reply) => reply,
            },
            _ => Reply::empty(StatusCode::NOT_FOUND),
        }
    }

    async fn ping(&self) -> Reply {
        match self.store.ping().await {
            Ok(()) => Reply::empty(StatusCode::OK),
            Err(e) => {
                error!(error = %e, "Storage is unreachable.");
                Reply::error(StatusCode::INTERNAL_SERVER_ERROR, e)
            }
        }
    }

    async fn list(&self) -> Reply {
        let mut metrics = match self.store.get_all().await {
            Ok(metrics) => metrics,
            Err(e) => return storage_failure(e),
        };
        if metrics.is_empty() {
            return Reply::html("<h3>No data</h3>".to_owned());
        }

        metrics.sort_by(|a, b| (a.name(), a.kind()).cmp(&(b.name(), b.kind())));
        let mut html = String::from("<h3>Current metrics</h3><ul>");
        for metric in &metrics {
            html.push_str(&format!("<li>{}</li>", escape_html(&metric.to_string())));
        }
        html.push_str("</ul>");
        Reply::html(html)
    }

    async fn value(&self, kind: &str, name: &str) -> Reply {
        let kind = match kind.parse::<MetricKind>() {
            Ok(kind) => kind,
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };
        match self.store.get_one(kind, name).await {
            Ok(Some(metric)) => Reply::text(metric.value().to_string()),
            Ok(None) => Reply::empty(StatusCode::NOT_FOUND),
            Err(e) => storage_failure(e),
        }
    }

    async fn update_raw(&self, kind: &str, name: &str, value: &str) -> Reply {
        let metric = match Metric::parse(kind, name, value) {
            Ok(metric) => metric,
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };
        match self.store.update_one(metric).await {
            Ok(()) => Reply::empty(StatusCode::OK),
            Err(e) => storage_failure(e),
        }
    }

    async fn value_json(&self, lookup: Lookup) -> Reply {
        let kind = match lookup.kind.parse::<MetricKind>() {
            Ok(kind) => kind,
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };
        match self.store.get_one(kind, &lookup.id).await {
            Ok(Some(metric)) => Reply::json(&MetricRecord::from(metric)),
            Ok(None) => Reply { content_type: Some(JSON), ..Reply::empty(StatusCode::NOT_FOUND) },
            Err(e) => storage_failure(e),
        }
    }

    async fn update_json(&self, record: MetricRecord) -> Reply {
        let metric = match Metric::try_from(record) {
            Ok(metric) => metric,
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };
        let (kind, name) = (metric.kind(), metric.name().to_owned());
        if let Err(e) = self.store.update_one(metric).await {
            return storage_failure(e);
        }
        match self.store.get_one(kind, &name).await {
            Ok(Some(stored)) => Reply::json(&MetricRecord::from(stored)),
            Ok(None) => {
                error!(%kind, %name, "Updated metric is missing from storage.");
                Reply::error(StatusCode::INTERNAL_SERVER_ERROR, "updated metric is missing")
            }
            Err(e) => storage_failure(e),
        }
    }

    async fn update_batch(&self, records: Vec<MetricRecord>) -> Reply {
        let metrics: Result<Vec<Metric>, _> = records.into_iter().map(Metric::try_from).collect();
        let metrics = match metrics {
            Ok(metrics) => metrics,
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };
        let echo: Vec<MetricRecord> = metrics.iter().cloned().map(MetricRecord::from).collect();
        match self.store.update_batch(metrics).await {
            Ok(()) => Reply::json(&echo),
            Err(e) => storage_failure(e),
        }
    }
}

fn storage_failure<E: std::fmt::Display>(e: E) -> Reply {
    error!(error = %e, "Storage operation failed.");
    Reply::error(StatusCode::INTERNAL_SERVER_ERROR, e)
}

fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>', '&', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| coding.split(';').next().is_some_and(|c| c.trim() == "gzip"))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(JSON))
}

fn json_body<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, Reply> {
    if !is_json(headers) {
        let message = "Content-Type must be application/json";
        return Err(Reply::error(StatusCode::UNSUPPORTED_MEDIA_TYPE, message));
    }
    serde_json::from_slice(body).map_err(|e| Reply::error(StatusCode::BAD_REQUEST, e))
}

#[cfg(test)]
mod tests {
    use hyper::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_TYPE};

    use super::{accepts_gzip, escape_html, is_json, Reply};

    fn headers(name: hyper::header::HeaderName, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip(&headers(ACCEPT_ENCODING, "gzip")));
        assert!(accepts_gzip(&headers(ACCEPT_ENCODING, "deflate, gzip;q=0.5")));
        assert!(!accepts_gzip(&headers(ACCEPT_ENCODING, "br")));
        assert!(!accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("PollCount (counter) = 5"), "PollCount (counter) = 5");
        assert_eq!(
            escape_html(r#"<script>alert("x" & 'y')</script>"#),
            "&lt;script&gt;alert(&quot;x&quot; &amp; &#39;y&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_is_json() {
        assert!(is_json(&headers(CONTENT_TYPE, "application/json")));
        assert!(is_json(&headers(CONTENT_TYPE, "application/json; charset=utf-8")));
        assert!(!is_json(&headers(CONTENT_TYPE, "text/plain")));
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn test_only_large_compressible_replies_are_gzipped() {
        let large = "x".repeat(2048);

        let response = Reply::html(large.clone()).into_response(true);
        assert_eq!(response.headers()["content-encoding"], "gzip");

        let response = Reply::html(large.clone()).into_response(false);
        assert!(response.headers().get("content-encoding").is_none());

        let response = Reply::html("<h3>No data</h3>".to_owned()).into_response(true);
        assert!(response.headers().get("content-encoding").is_none());

        let response = Reply::text(large).into_response(true);
        assert!(response.headers().get("content-encoding").is_none());
    }
}
