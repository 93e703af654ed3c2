//! Getting telemetry reports from the agent to the server.
//!
//! # Transport chain
//!
//! Outbound HTTP requests pass through a chain of [`Transport`]s, each wrapping the next, that
//! ends in the [`HttpSender`] which puts the request on the wire. The chain is built once at
//! startup with [`TransportBuilder`], from the stages in [`layers`]:
//!
//! ```text
//! real IP -> gzip -> encryption? -> signing? -> retry -> HTTP
//! ```
//!
//! Stages marked `?` are only part of the chain when a key is configured for them. Every stage
//! sees the request as left by the stage before it, so the signature covers the body exactly as
//! it is sent.
//!
//! ```no_run
//! use telemetry_transport::{OutgoingRequest, TransportBuilder};
//!
//! # async fn send() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = TransportBuilder::new("localhost:8080")
//!     .with_signing_key("secret")
//!     .build()?;
//!
//! let uri = endpoint.uri("/updates/")?;
//! let body = r#"[{"id":"PollCount","type":"counter","delta":1}]"#;
//! let response = endpoint.send(OutgoingRequest::post(uri, "application/json", body)).await?;
//! println!("server answered {}", response.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Ingress
//!
//! The server undoes the chain with [`Ingress`], which checks the sender's address and the body
//! digest before decrypting and decompressing the body.
//!
//! # RPC
//!
//! [`rpc`] offers the same reporting operations as length-delimited Protocol Buffers messages
//! over TCP, along with a client for them.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

use std::sync::Arc;

use async_trait::async_trait;

mod builder;
pub use self::builder::{Endpoint, TransportBuilder};

pub mod crypto;

mod error;
pub use self::error::{BuildError, KeyError, RpcError, TransportError};

mod ingress;
pub use self::ingress::{Ingress, Rejection};

pub mod layers;

mod request;
pub use self::request::{IncomingResponse, OutgoingRequest};

pub mod rpc;

mod sender;
pub use self::sender::HttpSender;

/// A stage of the transport chain.
///
/// Stages forward requests to the next stage, possibly rewriting them first. Failing to
/// exchange a request with the server is an error; an error status from the server is a
/// response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError>;
}

/// A type-erased transport stage.
pub type BoxTransport = Box<dyn Transport>;

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        (**self).send(request).await
    }
}
