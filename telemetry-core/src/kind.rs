use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::MetricError;

/// Metric kind.
///
/// Defines the kind, or type, of a metric, which in turn decides how updates are applied:
/// - counters accumulate, every update adds its delta to the stored value
/// - gauges replace, every update overwrites the stored value
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Counter type.
    Counter,
    /// Gauge type.
    Gauge,
}

impl MetricKind {
    /// All supported kinds.
    pub const ALL: [MetricKind; 2] = [MetricKind::Counter, MetricKind::Gauge];

    /// Returns the wire name of this kind, as used in URL paths, JSON records and database rows.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MetricError::UnsupportedKind(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::MetricKind;
    use crate::MetricError;

    #[test]
    fn test_parse_known_kinds() {
        assert_eq!("counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        let err = "Counter".parse::<MetricKind>().unwrap_err();
        assert!(matches!(err, MetricError::UnsupportedKind(ref s) if s == "Counter"));
        assert!("histogram".parse::<MetricKind>().is_err());
        assert!("".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_display_matches_wire_name() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.to_string().parse::<MetricKind>().unwrap(), kind);
        }
    }
}
