use thiserror::Error;

use crate::MetricKind;

/// Errors that can occur while validating a metric.
///
/// These are always caused by the caller's input and are never worth retrying.
#[derive(Debug, Error)]
pub enum MetricError {
    /// The metric kind is not one of the supported kinds.
    #[error("unsupported metric kind '{0}'")]
    UnsupportedKind(String),

    /// The metric name was empty.
    #[error("metric name is missing")]
    MissingName,

    /// The payload required by the metric kind was absent.
    #[error("missing value for {0} metric")]
    MissingValue(MetricKind),

    /// The raw value could not be parsed as the metric kind.
    #[error("invalid {kind} value '{value}'")]
    InvalidValue {
        /// Kind the value was parsed as.
        kind: MetricKind,

        /// The offending raw value.
        value: String,
    },

    /// Both a counter delta and a gauge value were present.
    #[error("metric '{0}' carries both a delta and a value")]
    ConflictingValues(String),
}
