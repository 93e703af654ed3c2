//! Stages of the outbound transport chain.
//!
//! Every stage wraps the next one and may rewrite a request before forwarding it. In the order a
//! request passes through them:
//!
//! - [`RealIpLayer`] tags the request with the sender's address
//! - [`GzipLayer`] compresses large, compressible bodies
//! - [`EncryptLayer`] encrypts the body with the server's public key
//! - [`SignLayer`] attaches an integrity digest of the body
//! - [`RetryLayer`] retries requests that fail to reach the server
//!
//! Stages are type-erased to [`BoxTransport`][crate::BoxTransport] so that optional stages can be
//! pushed as `Option`s and are left out of the chain entirely when `None`.
mod compression;
pub use self::compression::{gunzip, gzip, is_compressible, Gzip, GzipLayer, MIN_COMPRESSIBLE_LEN};

mod encryption;
pub use self::encryption::{Encrypt, EncryptLayer, ENCRYPTED_CODING};

mod real_ip;
pub use self::real_ip::{discover_outbound_ip, RealIp, RealIpLayer, REAL_IP_HEADER};

mod retry;
pub use self::retry::{Retry, RetryLayer};

mod signing;
pub use self::signing::{sign, verify, Sign, SignLayer, HASH_HEADER};
