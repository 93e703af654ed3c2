use std::io;

use thiserror::Error;

/// Errors that can occur while sending a request down the transport chain.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request URI is invalid.
    #[error("invalid request URI: {0}")]
    InvalidUri(String),

    /// The request could not be exchanged with the server.
    #[error("failed to send request: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),

    /// The request body could not be compressed.
    #[error("failed to compress request body: {0}")]
    Compression(#[source] io::Error),

    /// The request body could not be encrypted.
    #[error("failed to encrypt request body: {0}")]
    Encryption(#[from] rsa::Error),

    /// A blocking task panicked or was cancelled.
    #[error("transport task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An RPC exchange failed.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

/// Errors that can occur while exchanging RPC frames.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Reading from or writing to the connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A frame exceeded the maximum frame length.
    #[error("frame of {len} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge {
        /// Declared length of the frame.
        len: usize,

        /// Maximum accepted frame length.
        limit: usize,
    },

    /// The server answered with an error.
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Errors that can occur while loading an RSA key.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key file could not be read.
    #[error("failed to read key file: {0}")]
    Io(#[from] io::Error),

    /// The file did not contain a PEM block.
    #[error("no PEM block found")]
    MissingPem,

    /// The PEM block holds a kind of key that is not supported.
    #[error("unsupported key type '{0}'")]
    UnsupportedType(String),

    /// The key could not be parsed.
    #[error("failed to parse key: {reason}")]
    Parse {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The key is too small for OAEP with SHA-256.
    #[error("key of {size} bytes is too small for OAEP with SHA-256")]
    TooSmall {
        /// Modulus size, in bytes.
        size: usize,
    },
}

/// Errors that could occur while building a transport chain.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the server address.
    #[error("invalid server address: {reason}")]
    InvalidAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// Failed to load the public key used for encryption.
    #[error("failed to load public key: {0}")]
    PublicKey(#[source] KeyError),
}
