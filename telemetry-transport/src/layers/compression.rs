use std::io::{self, Read, Write};

use async_trait::async_trait;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use telemetry_core::layers::Layer;

use crate::{BoxTransport, IncomingResponse, OutgoingRequest, Transport, TransportError};

/// Smallest body, in bytes, worth compressing.
pub const MIN_COMPRESSIBLE_LEN: usize = 1024;

/// Returns `true` if bodies of the given content type are worth compressing.
///
/// Parameters such as `charset` are ignored.
pub fn is_compressible(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    matches!(media_type, "application/json" | "text/html")
}

/// Gzip-compresses `data`.
///
/// # Errors
///
/// Fails if the encoder fails, which only happens if it runs out of memory.
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses gzip-compressed `data`.
///
/// # Errors
///
/// Fails if `data` is not a valid gzip stream.
pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}

/// Compresses request bodies.
///
/// Bodies are compressed only when their content type is compressible and they are at least
/// [`MIN_COMPRESSIBLE_LEN`] bytes long.
pub struct Gzip {
    inner: BoxTransport,
}

#[async_trait]
impl Transport for Gzip {
    async fn send(&self, mut request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        let compressible = request.content_type().is_some_and(is_compressible);
        match request.body.as_ref() {
            Some(body) if compressible && body.len() >= MIN_COMPRESSIBLE_LEN => {
                let compressed = gzip(body).map_err(TransportError::Compression)?;
                request.body = Some(compressed.into());
                request.push_content_encoding("gzip");
            }
            _ => {}
        }
        self.inner.send(request).await
    }
}

/// A layer for compressing request bodies.
#[derive(Clone, Copy, Debug, Default)]
pub struct GzipLayer;

impl Layer<BoxTransport> for GzipLayer {
    type Output = BoxTransport;

    fn layer(&self, inner: BoxTransport) -> Self::Output {
        Box::new(Gzip { inner })
    }
}
