use std::{net::Ipv4Addr, path::Path};

use hyper::Uri;
use telemetry_core::{layers::Stack, Backoff};

use crate::{
    crypto::Encrypter,
    layers::{EncryptLayer, GzipLayer, RealIpLayer, RetryLayer, SignLayer},
    BoxTransport, BuildError, HttpSender, IncomingResponse, OutgoingRequest, Transport,
    TransportError,
};

/// A server endpoint reached through a transport chain.
pub struct Endpoint {
    base: String,
    transport: BoxTransport,
}

impl Endpoint {
    /// Creates an endpoint for the server at `base` (`scheme://host:port`), reached through
    /// `transport`.
    pub fn new<B: Into<String>>(base: B, transport: BoxTransport) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Endpoint { base, transport }
    }

    /// Returns the URI of `path` on this endpoint.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not form a valid URI.
    pub fn uri(&self, path: &str) -> Result<Uri, TransportError> {
        format!("{}{}", self.base, path)
            .parse::<Uri>()
            .map_err(|e| TransportError::InvalidUri(e.to_string()))
    }

    /// Sends a request through the transport chain.
    ///
    /// # Errors
    ///
    /// Fails if the request could not be exchanged with the server.
    pub async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        self.transport.send(request).await
    }
}

/// Builder for the outbound transport chain.
///
/// The chain always compresses and retries. Signing and encryption are only part of the chain
/// when a key is configured.
pub struct TransportBuilder {
    address: String,
    backoff: Backoff,
    signing_key: Option<Vec<u8>>,
    encrypter: Option<Encrypter>,
    real_ip: Option<Option<Ipv4Addr>>,
}

impl TransportBuilder {
    /// Creates a new `TransportBuilder` for the server at `address` (`host:port`).
    pub fn new<A: Into<String>>(address: A) -> Self {
        TransportBuilder {
            address: address.into(),
            backoff: Backoff::default(),
            signing_key: None,
            encrypter: None,
            real_ip: None,
        }
    }

    /// Set the retry schedule.
    ///
    /// Defaults to retrying after 1, 3 and 5 seconds.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the shared secret used to sign request bodies.
    ///
    /// An empty key disables signing. Defaults to no signing.
    #[must_use]
    pub fn with_signing_key<K: Into<Vec<u8>>>(mut self, key: K) -> Self {
        let key = key.into();
        self.signing_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    /// Set the encrypter used to encrypt request bodies.
    ///
    /// Defaults to no encryption.
    #[must_use]
    pub fn with_encrypter(mut self, encrypter: Encrypter) -> Self {
        self.encrypter = Some(encrypter);
        self
    }

    /// Load the server's public key from a PEM file and encrypt request bodies with it.
    ///
    /// # Errors
    ///
    /// If the key cannot be read or parsed, an error is returned.
    pub fn with_public_key_file<P: AsRef<Path>>(self, path: P) -> Result<Self, BuildError> {
        let encrypter = Encrypter::from_file(path).map_err(BuildError::PublicKey)?;
        Ok(self.with_encrypter(encrypter))
    }

    /// Set the address requests are tagged with, or `None` to not tag them.
    ///
    /// Defaults to the outbound address discovered for the server when the chain is built.
    #[must_use]
    pub fn with_real_ip(mut self, ip: Option<Ipv4Addr>) -> Self {
        self.real_ip = Some(ip);
        self
    }

    /// Builds the transport chain.
    ///
    /// # Errors
    ///
    /// If the server address is not a valid `host:port` authority, an error is returned.
    pub fn build(self) -> Result<Endpoint, BuildError> {
        let base = format!("http://{}", self.address);
        let uri = format!("{base}/")
            .parse::<Uri>()
            .map_err(|e| BuildError::InvalidAddress { reason: e.to_string() })?;
        if uri.host().map_or(true, str::is_empty) || uri.path() != "/" {
            return Err(BuildError::InvalidAddress {
                reason: format!("expected host:port, got '{}'", self.address),
            });
        }

        let real_ip = match self.real_ip {
            Some(Some(ip)) => RealIpLayer::new(ip),
            Some(None) => RealIpLayer::default(),
            None => RealIpLayer::discover(&self.address),
        };

        let transport = Stack::new(Box::new(HttpSender::new()) as BoxTransport)
            .push(RetryLayer::new(self.backoff))
            .push(self.signing_key.map(SignLayer::new))
            .push(self.encrypter.map(EncryptLayer::new))
            .push(GzipLayer)
            .push(real_ip)
            .into_inner();

        Ok(Endpoint::new(base, transport))
    }
}
