use bytes::Bytes;
use hyper::{
    header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE},
    Method, StatusCode, Uri,
};

/// A request travelling down the transport chain.
///
/// The body is an immutable buffer, so a request can be cloned cheaply and every retry replays
/// exactly the same bytes.
#[derive(Clone, Debug)]
pub struct OutgoingRequest {
    /// Request method.
    pub method: Method,

    /// Target URI.
    pub uri: Uri,

    /// Request headers.
    pub headers: HeaderMap,

    /// Request body, if any.
    pub body: Option<Bytes>,
}

impl OutgoingRequest {
    /// Creates a `POST` request with the given content type and body.
    pub fn post<B: Into<Bytes>>(uri: Uri, content_type: &'static str, body: B) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        OutgoingRequest { method: Method::POST, uri, headers, body: Some(body.into()) }
    }

    /// Creates a `POST` request without a body.
    pub fn post_empty(uri: Uri) -> Self {
        OutgoingRequest { method: Method::POST, uri, headers: HeaderMap::new(), body: None }
    }

    /// Returns the declared content type, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok())
    }

    /// Appends a content coding to `Content-Encoding`.
    ///
    /// Codings are listed in the order they were applied, so the last one listed must be undone
    /// first.
    pub fn push_content_encoding(&mut self, coding: &'static str) {
        let value = match self.headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => {
                HeaderValue::from_str(&format!("{existing}, {coding}"))
                    .unwrap_or_else(|_| HeaderValue::from_static(coding))
            }
            _ => HeaderValue::from_static(coding),
        };
        self.headers.insert(CONTENT_ENCODING, value);
    }
}

/// A response returned by the transport chain.
///
/// Error statuses are responses too: only failures to exchange a request and response at all are
/// reported as errors.
#[derive(Clone, Debug)]
pub struct IncomingResponse {
    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,
}
