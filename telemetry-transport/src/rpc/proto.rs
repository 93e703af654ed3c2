//! Protocol Buffers messages exchanged with the RPC service.
//!
//! .proto:
//! ```protobuf
//! enum MetricType {
//!   METRIC_TYPE_UNSPECIFIED = 0;
//!   METRIC_TYPE_COUNTER = 1;
//!   METRIC_TYPE_GAUGE = 2;
//! }
//!
//! message Metric {
//!   string id = 1;
//!   MetricType type = 2;
//!   optional int64 delta = 3;
//!   optional double value = 4;
//! }
//!
//! message ReportRawMetric {
//!   string type = 1;
//!   string key = 2;
//!   string value = 3;
//! }
//!
//! message ReportMetric { Metric metric = 1; }
//! message ReportBatch { repeated Metric metrics = 1; }
//!
//! message Request {
//!   oneof method {
//!     ReportRawMetric report_raw = 1;
//!     ReportMetric report = 2;
//!     ReportBatch report_batch = 3;
//!   }
//! }
//!
//! message Response {
//!   bool ok = 1;
//!   optional string error = 2;
//! }
//! ```
use telemetry_core::{MetricError, MetricKind, MetricRecord};

/// Kind of a metric, as sent on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    /// No kind was set.
    Unspecified = 0,
    /// A counter.
    Counter = 1,
    /// A gauge.
    Gauge = 2,
}

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricType::Counter,
            MetricKind::Gauge => MetricType::Gauge,
        }
    }
}

/// A metric.
#[derive(prost::Message, Clone, PartialEq)]
pub struct Metric {
    /// Metric name.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Metric kind.
    #[prost(enumeration = "MetricType", tag = "2")]
    pub kind: i32,
    /// Counter delta.
    #[prost(int64, optional, tag = "3")]
    pub delta: Option<i64>,
    /// Gauge value.
    #[prost(double, optional, tag = "4")]
    pub value: Option<f64>,
}

impl From<telemetry_core::Metric> for Metric {
    fn from(metric: telemetry_core::Metric) -> Self {
        let kind = MetricType::from(metric.kind()) as i32;
        let MetricRecord { id, delta, value, .. } = MetricRecord::from(metric);
        Metric { id, kind, delta, value }
    }
}

impl TryFrom<Metric> for telemetry_core::Metric {
    type Error = MetricError;

    fn try_from(metric: Metric) -> Result<Self, Self::Error> {
        let kind = match MetricType::try_from(metric.kind) {
            Ok(MetricType::Counter) => MetricKind::Counter.as_str().to_owned(),
            Ok(MetricType::Gauge) => MetricKind::Gauge.as_str().to_owned(),
            Ok(MetricType::Unspecified) => {
                return Err(MetricError::UnsupportedKind("unspecified".into()))
            }
            Err(_) => return Err(MetricError::UnsupportedKind(metric.kind.to_string())),
        };
        let record = MetricRecord { id: metric.id, kind, delta: metric.delta, value: metric.value };
        telemetry_core::Metric::try_from(record)
    }
}

/// Reports a single metric in its raw, path-encoded form.
#[derive(prost::Message, Clone, PartialEq)]
pub struct ReportRawMetric {
    /// Metric kind, as its wire name.
    #[prost(string, tag = "1")]
    pub kind: String,
    /// Metric name.
    #[prost(string, tag = "2")]
    pub key: String,
    /// Unparsed value.
    #[prost(string, tag = "3")]
    pub value: String,
}

/// Reports a single metric.
#[derive(prost::Message, Clone, PartialEq)]
pub struct ReportMetric {
    /// The metric to report.
    #[prost(message, optional, tag = "1")]
    pub metric: Option<Metric>,
}

/// Reports a batch of metrics.
#[derive(prost::Message, Clone, PartialEq)]
pub struct ReportBatch {
    /// The metrics to report.
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<Metric>,
}

/// A call to the RPC service.
#[derive(prost::Message, Clone, PartialEq)]
pub struct Request {
    /// The method being called.
    #[prost(oneof = "Method", tags = "1, 2, 3")]
    pub method: Option<Method>,
}

/// Methods of the RPC service.
#[derive(prost::Oneof, Clone, PartialEq)]
pub enum Method {
    /// Report a raw metric.
    #[prost(message, tag = "1")]
    ReportRaw(ReportRawMetric),
    /// Report a metric.
    #[prost(message, tag = "2")]
    Report(ReportMetric),
    /// Report a batch of metrics.
    #[prost(message, tag = "3")]
    ReportBatch(ReportBatch),
}

/// The result of a call.
#[derive(prost::Message, Clone, PartialEq)]
pub struct Response {
    /// Whether the call succeeded.
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Why the call failed.
    #[prost(string, optional, tag = "2")]
    pub error: Option<String>,
}

impl Response {
    /// A successful response.
    pub fn success() -> Self {
        Response { ok: true, error: None }
    }

    /// A failed response.
    pub fn failure<E: ToString>(error: E) -> Self {
        Response { ok: false, error: Some(error.to_string()) }
    }
}
