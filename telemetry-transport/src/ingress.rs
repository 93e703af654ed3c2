//! Server-side mirror of the transport chain.
//!
//! Incoming requests are checked and unwrapped in the reverse order of the outbound chain:
//!
//! 1. the sender's `X-Real-IP` must fall inside the trusted subnet, if one is configured
//! 2. the `HashSHA256` digest must match the body, if a shared secret is configured and the
//!    header is present
//! 3. an `encrypted` body is decrypted with the private key
//! 4. a `gzip` body is decompressed
use std::{net::IpAddr, sync::Arc};

use bytes::Bytes;
use hyper::{
    header::{HeaderMap, HeaderValue, CONTENT_ENCODING},
    StatusCode,
};
use ipnet::IpNet;
use thiserror::Error;

use crate::{
    crypto::Decrypter,
    layers::{gunzip, verify, ENCRYPTED_CODING, HASH_HEADER, REAL_IP_HEADER},
};

/// Reasons for refusing an incoming request.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The sender is not trusted.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// The body failed an integrity or decoding check.
    #[error("bad request: {0}")]
    BadRequest(&'static str),
}

impl Rejection {
    /// Returns the HTTP status matching this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Forbidden(_) => StatusCode::FORBIDDEN,
            Rejection::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Checks and unwraps incoming requests.
#[derive(Clone, Debug, Default)]
pub struct Ingress {
    trusted_subnet: Option<IpNet>,
    signing_key: Option<Vec<u8>>,
    decrypter: Option<Arc<Decrypter>>,
}

impl Ingress {
    /// Creates an `Ingress` that accepts every request as-is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept requests whose `X-Real-IP` lies within `subnet`.
    #[must_use]
    pub fn with_trusted_subnet(mut self, subnet: IpNet) -> Self {
        self.trusted_subnet = Some(subnet);
        self
    }

    /// Validate body digests with the given shared secret. An empty key disables validation.
    #[must_use]
    pub fn with_signing_key<K: Into<Vec<u8>>>(mut self, key: K) -> Self {
        let key = key.into();
        self.signing_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    /// Decrypt encrypted bodies with the given private key.
    #[must_use]
    pub fn with_decrypter(mut self, decrypter: Decrypter) -> Self {
        self.decrypter = Some(Arc::new(decrypter));
        self
    }

    /// Checks that the sender of a request is trusted.
    ///
    /// # Errors
    ///
    /// When a trusted subnet is configured, rejects requests whose `X-Real-IP` is missing,
    /// unparseable or outside the subnet.
    pub fn check_source(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        let Some(subnet) = &self.trusted_subnet else {
            return Ok(());
        };

        let ip = headers
            .get(REAL_IP_HEADER)
            .ok_or(Rejection::Forbidden("missing X-Real-IP"))?
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
            .ok_or(Rejection::Forbidden("invalid X-Real-IP"))?;

        if subnet.contains(&ip) {
            Ok(())
        } else {
            Err(Rejection::Forbidden("sender outside trusted subnet"))
        }
    }

    /// Validates and unwraps a request body.
    ///
    /// The content codings that were undone are removed from `headers`.
    ///
    /// # Errors
    ///
    /// Rejects bodies whose digest does not match, that cannot be decrypted or decompressed, or
    /// that use an unsupported content coding.
    pub fn open_body(&self, headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, Rejection> {
        if let (Some(key), Some(digest)) = (&self.signing_key, headers.get(HASH_HEADER)) {
            let digest = digest.to_str().map_err(|_| Rejection::BadRequest("invalid digest"))?;
            if !verify(&body, key, digest) {
                return Err(Rejection::BadRequest("digest mismatch"));
            }
        }

        let mut codings = content_codings(headers);
        let mut body = body;
        while let Some(coding) = codings.pop() {
            body = match coding.as_str() {
                ENCRYPTED_CODING => {
                    let decrypter = self
                        .decrypter
                        .as_ref()
                        .ok_or(Rejection::BadRequest("encrypted body without private key"))?;
                    decrypter
                        .decrypt(&body)
                        .map_err(|_| Rejection::BadRequest("failed to decrypt body"))?
                        .into()
                }
                "gzip" => gunzip(&body)
                    .map_err(|_| Rejection::BadRequest("failed to decompress body"))?
                    .into(),
                "identity" => body,
                _ => return Err(Rejection::BadRequest("unsupported content encoding")),
            };
        }

        headers.remove(CONTENT_ENCODING);
        Ok(body)
    }
}

fn content_codings(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|value: &HeaderValue| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|coding| coding.trim().to_ascii_lowercase())
        .filter(|coding| !coding.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hyper::{
        header::{HeaderMap, HeaderValue, CONTENT_ENCODING},
        StatusCode,
    };

    use super::{Ingress, Rejection};
    use crate::{
        crypto::tests::key_pair,
        layers::{gzip, sign, HASH_HEADER, REAL_IP_HEADER},
    };

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_trusted_subnet() {
        let ingress = Ingress::new().with_trusted_subnet("10.0.0.0/24".parse().unwrap());

        assert!(ingress.check_source(&headers(&[(REAL_IP_HEADER, "10.0.0.7")])).is_ok());

        for pairs in [vec![], vec![(REAL_IP_HEADER, "10.0.1.7")], vec![(REAL_IP_HEADER, "nope")]] {
            let err = ingress.check_source(&headers(&pairs)).unwrap_err();
            assert_eq!(err.status(), StatusCode::FORBIDDEN);
        }

        assert!(Ingress::new().check_source(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_digest_validation() {
        let ingress = Ingress::new().with_signing_key("k");
        let body = Bytes::from_static(b"v");
        let digest = sign(b"v", b"k");

        let mut matching = headers(&[(HASH_HEADER, &digest)]);
        assert_eq!(ingress.open_body(&mut matching, body.clone()).unwrap(), body);

        let mut altered = digest.clone();
        let last = altered.pop().unwrap();
        altered.push(if last == '0' { '1' } else { '0' });
        let err = ingress.open_body(&mut headers(&[(HASH_HEADER, &altered)]), body.clone());
        assert!(matches!(err, Err(Rejection::BadRequest(_))));

        // Unsigned requests are let through.
        assert_eq!(ingress.open_body(&mut HeaderMap::new(), body.clone()).unwrap(), body);

        // Without a key, digests are not checked at all.
        let unchecked = Ingress::new().open_body(&mut headers(&[(HASH_HEADER, &altered)]), body);
        assert!(unchecked.is_ok());
    }

    #[test]
    fn test_unwraps_gzip_then_encryption() {
        let (encrypter, decrypter) = key_pair();
        let ingress = Ingress::new().with_decrypter(decrypter);

        let plain = vec![b'x'; 4096];
        let wire = encrypter.encrypt(&gzip(&plain).unwrap()).unwrap();

        let mut headers = headers(&[("content-encoding", "gzip, encrypted")]);
        let body = ingress.open_body(&mut headers, wire.into()).unwrap();
        assert_eq!(body, plain);
        assert!(headers.get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_rejects_undecodable_bodies() {
        let ingress = Ingress::new();

        let corrupt = ingress
            .open_body(&mut headers(&[("content-encoding", "gzip")]), Bytes::from_static(b"nope"));
        assert!(matches!(corrupt, Err(Rejection::BadRequest(_))));

        let mut encrypted = headers(&[("content-encoding", "encrypted")]);
        let no_key = ingress.open_body(&mut encrypted, Bytes::from_static(b"x"));
        assert!(matches!(no_key, Err(Rejection::BadRequest(_))));

        let unknown = ingress
            .open_body(&mut headers(&[("content-encoding", "br")]), Bytes::from_static(b"x"));
        assert!(matches!(unknown, Err(Rejection::BadRequest(_))));
    }
}
