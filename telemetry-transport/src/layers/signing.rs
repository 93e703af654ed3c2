use async_trait::async_trait;
use hyper::header::HeaderValue;
use sha2::{digest::Output, Digest, Sha256};
use subtle::ConstantTimeEq;
use telemetry_core::layers::Layer;

use crate::{BoxTransport, IncomingResponse, OutgoingRequest, Transport, TransportError};

/// Header carrying the integrity digest of a request body.
pub const HASH_HEADER: &str = "HashSHA256";

/// Computes the integrity digest of `body`: the lowercase hex SHA-256 of `body || key`.
pub fn sign(body: &[u8], key: &[u8]) -> String {
    hex::encode(digest(body, key))
}

/// Returns `true` if `digest` is the integrity digest of `body` under `key`.
///
/// The hex digest may use either case. Digests are compared in constant time.
pub fn verify(body: &[u8], key: &[u8], digest: &str) -> bool {
    let Ok(claimed) = hex::decode(digest) else {
        return false;
    };
    self::digest(body, key).as_slice().ct_eq(&claimed).into()
}

fn digest(body: &[u8], key: &[u8]) -> Output<Sha256> {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(key);
    hasher.finalize()
}

/// Signs request bodies with a shared secret.
///
/// Requests without a body are forwarded unsigned.
pub struct Sign {
    inner: BoxTransport,
    key: Vec<u8>,
}

#[async_trait]
impl Transport for Sign {
    async fn send(&self, mut request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        if let Some(body) = &request.body {
            // Hex digests are always valid header values.
            if let Ok(digest) = HeaderValue::from_str(&sign(body, &self.key)) {
                request.headers.insert(HASH_HEADER, digest);
            }
        }
        self.inner.send(request).await
    }
}

/// A layer for signing request bodies.
#[derive(Clone, Debug)]
pub struct SignLayer {
    key: Vec<u8>,
}

impl SignLayer {
    /// Creates a new `SignLayer` using the given shared secret.
    pub fn new<K: Into<Vec<u8>>>(key: K) -> Self {
        SignLayer { key: key.into() }
    }
}

impl Layer<BoxTransport> for SignLayer {
    type Output = BoxTransport;

    fn layer(&self, inner: BoxTransport) -> Self::Output {
        Box::new(Sign { inner, key: self.key.clone() })
    }
}

#[cfg(test)]
mod tests {
    use telemetry_core::layers::Layer;

    use super::{sign, verify, SignLayer, HASH_HEADER};
    use crate::{testing::Recorder, OutgoingRequest, Transport};

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sign(b"v", b"k"),
            "8630c6c9af0730c3e9635a44c97bfb4ac4ff57c449951a60848ac666f5f2de0c"
        );
    }

    #[test]
    fn test_verify() {
        let digest = sign(b"v", b"k");
        assert!(verify(b"v", b"k", &digest));
        assert!(!verify(b"w", b"k", &digest));
        assert!(!verify(b"v", b"j", &digest));

        assert!(verify(b"v", b"k", &digest.to_uppercase()));
        assert!(!verify(b"v", b"k", &digest[..62]));
        assert!(!verify(b"v", b"k", &format!("{digest}00")));
        assert!(!verify(b"v", b"k", &digest.replace(|c: char| c.is_ascii_digit(), "z")));
        assert!(!verify(b"v", b"k", ""));
    }

    #[tokio::test]
    async fn test_signs_body() {
        let recorder = Recorder::new();
        let transport = SignLayer::new("k").layer(Box::new(recorder.clone()));

        let uri = "http://localhost/updates/".parse().unwrap();
        transport.send(OutgoingRequest::post(uri, "application/json", "v")).await.unwrap();
        assert_eq!(recorder.last().headers[HASH_HEADER], sign(b"v", b"k").as_str());

        let uri = "http://localhost/update/counter/a/1".parse().unwrap();
        transport.send(OutgoingRequest::post_empty(uri)).await.unwrap();
        assert!(recorder.last().headers.get(HASH_HEADER).is_none());
    }
}
