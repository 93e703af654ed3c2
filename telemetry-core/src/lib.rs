//! Shared building blocks for the telemetry agent and server.
//!
//! # Metrics
//!
//! A [`Metric`] is identified by its name and its [`MetricKind`]. The kind decides both the
//! payload a metric carries and how updates to it are applied:
//!
//! - a **counter** carries an integer delta; stored counters accumulate every delta they receive
//! - a **gauge** carries a floating-point value; stored gauges keep the most recent value
//!
//! The payload is encoded in [`MetricValue`], so a metric can never hold both a delta and a value.
//! On the wire, and on disk, metrics are represented as [`MetricRecord`]s:
//!
//! ```json
//! {"id": "PollCount", "type": "counter", "delta": 5}
//! {"id": "RandomValue", "type": "gauge", "value": 0.25}
//! ```
//!
//! Converting a record into a metric validates it, returning a [`MetricError`] for unsupported
//! kinds, missing names, and missing, conflicting or non-finite payloads.
//!
//! # Snapshots
//!
//! Samplers expose what they have collected as a [`Snapshot`]: a point-in-time copy of counters
//! and gauges that is converted into metrics for reporting.
//!
//! # Retries
//!
//! [`Backoff`] describes a fixed retry schedule: an immediate first attempt followed by one
//! attempt after each configured delay. Both the storage retry decorator and the transport retry
//! stage run on it.
//!
//! # Layers
//!
//! Decorators are composed with [`layers::Layer`] and [`layers::Stack`].
//!
//! # Configuration
//!
//! [`config`] holds the helpers the binaries use to layer defaults, a configuration file,
//! command-line flags and environment variables.
//!
//! # Shutdown
//!
//! [`shutdown_token`] returns a [`CancellationToken`][tokio_util::sync::CancellationToken] that
//! is cancelled on process termination signals, which long-running loops select on.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod backoff;
pub use self::backoff::Backoff;

pub mod config;

mod error;
pub use self::error::MetricError;

mod kind;
pub use self::kind::MetricKind;

pub mod layers;

mod metric;
pub use self::metric::{Metric, MetricRecord, MetricValue};

mod shutdown;
pub use self::shutdown::shutdown_token;

mod snapshot;
pub use self::snapshot::Snapshot;
