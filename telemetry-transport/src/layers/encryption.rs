use std::sync::Arc;

use async_trait::async_trait;
use telemetry_core::layers::Layer;

use crate::{
    crypto::Encrypter, BoxTransport, IncomingResponse, OutgoingRequest, Transport, TransportError,
};

/// Content coding announcing an RSA-encrypted body.
pub const ENCRYPTED_CODING: &str = "encrypted";

/// Encrypts request bodies with the server's public key.
///
/// Requests without a body are forwarded untouched.
pub struct Encrypt {
    inner: BoxTransport,
    encrypter: Arc<Encrypter>,
}

#[async_trait]
impl Transport for Encrypt {
    async fn send(&self, mut request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        if let Some(body) = request.body.take() {
            let encrypter = Arc::clone(&self.encrypter);
            let ciphertext =
                tokio::task::spawn_blocking(move || encrypter.encrypt(&body)).await??;
            request.body = Some(ciphertext.into());
            request.push_content_encoding(ENCRYPTED_CODING);
        }
        self.inner.send(request).await
    }
}

/// A layer for encrypting request bodies.
#[derive(Clone, Debug)]
pub struct EncryptLayer {
    encrypter: Arc<Encrypter>,
}

impl EncryptLayer {
    /// Creates a new `EncryptLayer` using the given encrypter.
    pub fn new(encrypter: Encrypter) -> Self {
        EncryptLayer { encrypter: Arc::new(encrypter) }
    }
}

impl Layer<BoxTransport> for EncryptLayer {
    type Output = BoxTransport;

    fn layer(&self, inner: BoxTransport) -> Self::Output {
        Box::new(Encrypt { inner, encrypter: Arc::clone(&self.encrypter) })
    }
}

#[cfg(test)]
mod tests {
    use hyper::header::CONTENT_ENCODING;
    use telemetry_core::layers::{Layer, Stack};

    use super::EncryptLayer;
    use crate::{
        crypto::tests::key_pair, layers::GzipLayer, testing::Recorder, OutgoingRequest, Transport,
    };

    #[tokio::test]
    async fn test_encrypts_body() {
        let (encrypter, decrypter) = key_pair();
        let recorder = Recorder::new();
        let transport = EncryptLayer::new(encrypter).layer(Box::new(recorder.clone()));

        let body = br#"[{"id":"a","type":"counter","delta":1}]"#;
        let uri = "http://localhost/updates/".parse().unwrap();
        let request = OutgoingRequest::post(uri, "application/json", &body[..]);
        transport.send(request).await.unwrap();

        let sent = recorder.last();
        assert_eq!(sent.headers[CONTENT_ENCODING], "encrypted");
        let ciphertext = sent.body.unwrap();
        assert_ne!(&ciphertext[..], &body[..]);
        assert_eq!(decrypter.decrypt(&ciphertext).unwrap(), body);
    }

    #[tokio::test]
    async fn test_records_coding_order() {
        let (encrypter, _) = key_pair();
        let recorder = Recorder::new();
        let transport = Stack::new(Recorder::boxed(&recorder))
            .push(EncryptLayer::new(encrypter))
            .push(GzipLayer)
            .into_inner();

        let uri = "http://localhost/updates/".parse().unwrap();
        let request = OutgoingRequest::post(uri, "application/json", vec![b' '; 2048]);
        transport.send(request).await.unwrap();
        assert_eq!(recorder.last().headers[CONTENT_ENCODING], "gzip, encrypted");
    }

    #[tokio::test]
    async fn test_skips_bodyless_requests() {
        let (encrypter, _) = key_pair();
        let recorder = Recorder::new();
        let transport = EncryptLayer::new(encrypter).layer(Box::new(recorder.clone()));

        let uri = "http://localhost/update/counter/a/1".parse().unwrap();
        transport.send(OutgoingRequest::post_empty(uri)).await.unwrap();
        let sent = recorder.last();
        assert!(sent.body.is_none());
        assert!(sent.headers.get(CONTENT_ENCODING).is_none());
    }
}
