use crate::proto;
use serde::{Deserialize, Serialize};

/// Distinguished counter the agent increments on every poll.
pub const POLL_COUNT: &str = "PollCount";

/// Metric kind.
///
/// Unknown type strings deserialize into [`MetricType::Unknown`] so that the
/// validator can report them alongside every other violation instead of
/// failing the whole document at the parser.
///
/// # Examples
///
/// ```
/// use vitals_common::types::MetricType;
///
/// let kind: MetricType = "counter".parse().unwrap();
/// assert_eq!(kind, MetricType::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Gauge,
    Counter,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Gauge => write!(f, "gauge"),
            MetricType::Counter => write!(f, "counter"),
            MetricType::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricType::Gauge),
            "counter" => Ok(MetricType::Counter),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

/// A single metric sample.
///
/// `value` is meaningful only for gauges and `delta` only for counters; the
/// inapplicable field is omitted on the wire.
///
/// # Examples
///
/// ```
/// use vitals_common::types::Metric;
///
/// let json = serde_json::to_string(&Metric::gauge("Alloc", 123.45)).unwrap();
/// assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":123.45}"#);
///
/// let json = serde_json::to_string(&Metric::counter("PollCount", 5)).unwrap();
/// assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":5}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Ordered sequence of metrics delivered together.
pub type MetricBatch = Vec<Metric>;

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            metric_type: MetricType::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            metric_type: MetricType::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// A metric carrying only its identity, as sent to the read endpoints.
    pub fn key(id: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            id: id.into(),
            metric_type,
            delta: None,
            value: None,
        }
    }

    /// Text rendering of the populated field: gauges with the shortest exact
    /// decimal form, counters as integers. Empty when nothing applicable is set.
    pub fn value_string(&self) -> String {
        match self.metric_type {
            MetricType::Gauge => self.value.map(format_gauge).unwrap_or_default(),
            MetricType::Counter => self.delta.map(|d| d.to_string()).unwrap_or_default(),
            MetricType::Unknown => String::new(),
        }
    }
}

/// Formats a gauge without exponent and without trailing zeros.
///
/// ```
/// use vitals_common::types::format_gauge;
///
/// assert_eq!(format_gauge(7.0), "7");
/// assert_eq!(format_gauge(1.50), "1.5");
/// assert_eq!(format_gauge(0.0000001), "0.0000001");
/// ```
pub fn format_gauge(value: f64) -> String {
    format!("{value}")
}

impl From<&Metric> for proto::MetricProto {
    fn from(m: &Metric) -> Self {
        let metric_type = match m.metric_type {
            MetricType::Gauge => proto::MetricType::Gauge,
            MetricType::Counter => proto::MetricType::Counter,
            MetricType::Unknown => proto::MetricType::Unspecified,
        };
        Self {
            id: m.id.clone(),
            metric_type: metric_type as i32,
            value: m.value,
            delta: m.delta,
        }
    }
}

impl From<proto::MetricProto> for Metric {
    fn from(p: proto::MetricProto) -> Self {
        let metric_type = match p.metric_type() {
            proto::MetricType::Gauge => MetricType::Gauge,
            proto::MetricType::Counter => MetricType::Counter,
            proto::MetricType::Unspecified => MetricType::Unknown,
        };
        Self {
            id: p.id,
            metric_type,
            delta: p.delta,
            value: p.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_deserializes_for_later_validation() {
        let m: Metric = serde_json::from_str(r#"{"id":"X","type":"histogram","value":1}"#).unwrap();
        assert_eq!(m.metric_type, MetricType::Unknown);
        assert_eq!(m.value, Some(1.0));
    }

    #[test]
    fn missing_optional_fields_are_none() {
        let m: Metric = serde_json::from_str(r#"{"id":"G","type":"gauge"}"#).unwrap();
        assert_eq!(m, Metric::key("G", MetricType::Gauge));
    }

    #[test]
    fn value_string_matches_kind() {
        assert_eq!(Metric::gauge("g", 1.25).value_string(), "1.25");
        assert_eq!(Metric::counter("c", -3).value_string(), "-3");
        assert_eq!(Metric::key("c", MetricType::Counter).value_string(), "");
    }

    #[test]
    fn proto_conversion_keeps_kind_and_payload() {
        let original = Metric::counter(POLL_COUNT, 42);
        let proto = proto::MetricProto::from(&original);
        assert_eq!(proto.metric_type(), proto::MetricType::Counter);
        assert_eq!(Metric::from(proto), original);
    }
}
