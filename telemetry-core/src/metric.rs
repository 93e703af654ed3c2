use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MetricError, MetricKind};

/// The payload of a metric.
///
/// A counter always carries an integer delta and a gauge always carries a floating-point value,
/// so a metric can never hold both payloads, nor neither of them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// Counter delta.
    Counter(i64),
    /// Gauge value.
    Gauge(f64),
}

impl MetricValue {
    /// Returns the kind of this value.
    pub const fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Parses a raw string value as the given kind.
    ///
    /// Counters must be base-10 integers and gauges must be finite floating-point numbers.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::MissingValue`] if `raw` is empty, and
    /// [`MetricError::InvalidValue`] if it does not parse as the given kind.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        if raw.is_empty() {
            return Err(MetricError::MissingValue(kind));
        }

        let invalid = || MetricError::InvalidValue { kind, value: raw.to_owned() };
        match kind {
            MetricKind::Counter => {
                raw.parse::<i64>().map(MetricValue::Counter).map_err(|_| invalid())
            }
            MetricKind::Gauge => match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(MetricValue::Gauge(value)),
                _ => Err(invalid()),
            },
        }
    }
}

impl fmt::Display for MetricValue {
    // `f64`'s `Display` never switches to exponent notation and prints the shortest
    // representation that round-trips, e.g. `9.1` and `3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Counter(delta) => write!(f, "{delta}"),
            MetricValue::Gauge(value) => write!(f, "{value}"),
        }
    }
}

/// A single named metric.
///
/// Metrics are identified by their name and kind: a counter and a gauge may share a name and are
/// still distinct metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricRecord", into = "MetricRecord")]
pub struct Metric {
    name: String,
    value: MetricValue,
}

impl Metric {
    /// Creates a new metric from a name and a value.
    pub fn new<N: Into<String>>(name: N, value: MetricValue) -> Self {
        Metric { name: name.into(), value }
    }

    /// Creates a new counter metric.
    pub fn counter<N: Into<String>>(name: N, delta: i64) -> Self {
        Self::new(name, MetricValue::Counter(delta))
    }

    /// Creates a new gauge metric.
    pub fn gauge<N: Into<String>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Gauge(value))
    }

    /// Parses a metric from its raw, path-encoded parts: kind, name and value.
    ///
    /// # Errors
    ///
    /// Fails if the kind is not supported, the name is empty, or the value is missing or does
    /// not parse as the given kind.
    pub fn parse(kind: &str, name: &str, value: &str) -> Result<Self, MetricError> {
        let kind = kind.parse::<MetricKind>()?;
        if name.is_empty() {
            return Err(MetricError::MissingName);
        }
        let value = MetricValue::parse(kind, value)?;
        Ok(Metric::new(name, value))
    }

    /// Returns the name of this metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the kind of this metric.
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Returns the value of this metric.
    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// Returns the delta if this metric is a counter.
    pub fn delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(delta) => Some(delta),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Returns the value if this metric is a gauge.
    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(value) => Some(value),
            MetricValue::Counter(_) => None,
        }
    }

    /// Consumes the metric, returning its name and value.
    pub fn into_parts(self) -> (String, MetricValue) {
        (self.name, self.value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) = {}", self.name, self.kind(), self.value)
    }
}

/// The wire and on-disk representation of a metric: `{id, type, delta?, value?}`.
///
/// Records are loosely typed so that an unknown `type` is reported as
/// [`MetricError::UnsupportedKind`] rather than as a generic decoding failure. Converting a record
/// into a [`Metric`] validates it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name.
    pub id: String,

    /// Metric kind, as its wire name.
    #[serde(rename = "type")]
    pub kind: String,

    /// Counter delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<MetricRecord> for Metric {
    type Error = MetricError;

    fn try_from(record: MetricRecord) -> Result<Self, Self::Error> {
        let kind = record.kind.parse::<MetricKind>()?;
        if record.id.is_empty() {
            return Err(MetricError::MissingName);
        }

        let value = match (kind, record.delta, record.value) {
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) if value.is_finite() => {
                MetricValue::Gauge(value)
            }
            (MetricKind::Gauge, None, Some(value)) => {
                return Err(MetricError::InvalidValue { kind, value: value.to_string() })
            }
            (_, Some(_), Some(_)) => return Err(MetricError::ConflictingValues(record.id)),
            (kind, _, _) => return Err(MetricError::MissingValue(kind)),
        };

        Ok(Metric { name: record.id, value })
    }
}

impl From<Metric> for MetricRecord {
    fn from(metric: Metric) -> Self {
        let kind = metric.kind().as_str().to_owned();
        let (delta, value) = match metric.value {
            MetricValue::Counter(delta) => (Some(delta), None),
            MetricValue::Gauge(value) => (None, Some(value)),
        };
        MetricRecord { id: metric.name, kind, delta, value }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Metric, MetricRecord, MetricValue};
    use crate::{MetricError, MetricKind};

    #[test]
    fn test_parse_path_encoded() {
        let metric = Metric::parse("counter", "hits", "5").unwrap();
        assert_eq!(metric, Metric::counter("hits", 5));

        let metric = Metric::parse("gauge", "temp", "3.5").unwrap();
        assert_eq!(metric, Metric::gauge("temp", 3.5));
        assert_eq!(metric.kind(), MetricKind::Gauge);
        assert_eq!(metric.delta(), None);
        assert_eq!(metric.gauge_value(), Some(3.5));
    }

    #[test]
    fn test_parse_rejects_invalid_parts() {
        assert!(matches!(
            Metric::parse("histogram", "a", "1"),
            Err(MetricError::UnsupportedKind(_))
        ));
        assert!(matches!(Metric::parse("counter", "", "1"), Err(MetricError::MissingName)));
        assert!(matches!(
            Metric::parse("counter", "a", ""),
            Err(MetricError::MissingValue(MetricKind::Counter))
        ));
        assert!(matches!(
            Metric::parse("counter", "a", "1.5"),
            Err(MetricError::InvalidValue { kind: MetricKind::Counter, .. })
        ));
        assert!(matches!(
            Metric::parse("gauge", "a", "abc"),
            Err(MetricError::InvalidValue { kind: MetricKind::Gauge, .. })
        ));
        assert!(Metric::parse("gauge", "a", "NaN").is_err());
        assert!(Metric::parse("gauge", "a", "inf").is_err());
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(MetricValue::Counter(12).to_string(), "12");
        assert_eq!(MetricValue::Counter(-3).to_string(), "-3");
        assert_eq!(MetricValue::Gauge(9.1).to_string(), "9.1");
        assert_eq!(MetricValue::Gauge(3.0).to_string(), "3");
        assert_eq!(MetricValue::Gauge(0.000001).to_string(), "0.000001");
        assert_eq!(Metric::gauge("temp", 9.1).to_string(), "temp (gauge) = 9.1");
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&Metric::counter("a", 1)).unwrap();
        assert_eq!(json, r#"{"id":"a","type":"counter","delta":1}"#);

        let json = serde_json::to_string(&Metric::gauge("b", 2.0)).unwrap();
        assert_eq!(json, r#"{"id":"b","type":"gauge","value":2.0}"#);

        let metrics: Vec<Metric> = serde_json::from_str(
            r#"[{"id":"a","type":"counter","delta":1},{"id":"b","type":"gauge","value":2.0}]"#,
        )
        .unwrap();
        assert_eq!(metrics, vec![Metric::counter("a", 1), Metric::gauge("b", 2.0)]);
    }

    #[test]
    fn test_record_validation() {
        let record = |kind: &str, delta, value| MetricRecord {
            id: "x".to_owned(),
            kind: kind.to_owned(),
            delta,
            value,
        };

        assert!(Metric::try_from(record("counter", Some(1), None)).is_ok());
        assert!(Metric::try_from(record("gauge", None, Some(1.0))).is_ok());
        assert!(matches!(
            Metric::try_from(record("counter", None, None)),
            Err(MetricError::MissingValue(MetricKind::Counter))
        ));
        assert!(matches!(
            Metric::try_from(record("gauge", Some(1), None)),
            Err(MetricError::MissingValue(MetricKind::Gauge))
        ));
        assert!(matches!(
            Metric::try_from(record("counter", Some(1), Some(1.0))),
            Err(MetricError::ConflictingValues(_))
        ));
        assert!(matches!(
            Metric::try_from(record("summary", Some(1), None)),
            Err(MetricError::UnsupportedKind(_))
        ));

        let err = serde_json::from_str::<Metric>(r#"{"id":"a","type":"counter"}"#).unwrap_err();
        assert!(err.to_string().contains("missing value"));
    }

    proptest! {
        #[test]
        fn test_rendered_values_parse_back(
            delta in any::<i64>(),
            value in proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
        ) {
            let rendered = MetricValue::Counter(delta).to_string();
            prop_assert_eq!(MetricValue::parse(MetricKind::Counter, &rendered).unwrap(),
                MetricValue::Counter(delta));

            let rendered = MetricValue::Gauge(value).to_string();
            prop_assert!(!rendered.contains(['e', 'E']), "exponent in {}", rendered);
            prop_assert_eq!(MetricValue::parse(MetricKind::Gauge, &rendered).unwrap(),
                MetricValue::Gauge(value));
        }
    }
}
