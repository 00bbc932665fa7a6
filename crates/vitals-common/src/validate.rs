//! Verification predicates over [`Metric`].
//!
//! Each predicate inspects one aspect of a metric. Callers pick the set that
//! matters for their operation and [`verify`] / [`verify_batch`] run all of
//! them, collecting every violation instead of stopping at the first.

use crate::types::{Metric, MetricType};
use std::fmt;

/// A single rule a metric failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("id is empty")]
    EmptyId,
    #[error("type must be gauge or counter")]
    UnknownType,
    #[error("counter requires delta")]
    MissingDelta,
    #[error("delta must not be negative, got {0}")]
    NegativeDelta(i64),
    #[error("gauge requires value")]
    MissingValue,
    #[error("gauge value must be finite, got {0}")]
    NonFiniteValue(f64),
}

pub type Check = fn(&Metric) -> Result<(), Violation>;

pub fn verify_id(m: &Metric) -> Result<(), Violation> {
    if m.id.trim().is_empty() {
        return Err(Violation::EmptyId);
    }
    Ok(())
}

pub fn verify_type(m: &Metric) -> Result<(), Violation> {
    match m.metric_type {
        MetricType::Gauge | MetricType::Counter => Ok(()),
        MetricType::Unknown => Err(Violation::UnknownType),
    }
}

pub fn verify_delta(m: &Metric) -> Result<(), Violation> {
    if m.metric_type == MetricType::Counter && m.delta.is_none() {
        return Err(Violation::MissingDelta);
    }
    Ok(())
}

/// Opt-in rule for deployments whose counters must never decrease.
pub fn verify_non_negative_delta(m: &Metric) -> Result<(), Violation> {
    match m.delta {
        Some(d) if m.metric_type == MetricType::Counter && d < 0 => {
            Err(Violation::NegativeDelta(d))
        }
        _ => Ok(()),
    }
}

/// Gauges need a value, and NaN or infinity cannot be stored or snapshotted.
pub fn verify_value(m: &Metric) -> Result<(), Violation> {
    if m.metric_type != MetricType::Gauge {
        return Ok(());
    }
    match m.value {
        None => Err(Violation::MissingValue),
        Some(v) if !v.is_finite() => Err(Violation::NonFiniteValue(v)),
        Some(_) => Ok(()),
    }
}

/// Rules for a metric that is about to be stored.
pub const UPDATE_CHECKS: &[Check] = &[verify_id, verify_type, verify_delta, verify_value];

/// Rules for a metric used as a lookup key.
pub const READ_CHECKS: &[Check] = &[verify_id, verify_type];

/// Violations of one metric, with its position when it came from a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub index: Option<usize>,
    pub id: String,
    pub violations: Vec<Violation>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "metric[{i}] {:?}: ", self.id)?,
            None => write!(f, "metric {:?}: ", self.id)?,
        }
        for (n, v) in self.violations.iter().enumerate() {
            if n > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Every violation found in a metric or batch.
///
/// # Examples
///
/// ```
/// use vitals_common::types::{Metric, MetricType};
/// use vitals_common::validate::{verify, UPDATE_CHECKS};
///
/// let bad = Metric::key(" ", MetricType::Gauge);
/// let err = verify(&bad, UPDATE_CHECKS).unwrap_err();
/// assert_eq!(err.failures[0].violations.len(), 2);
/// assert!(err.to_string().contains("id is empty"));
/// assert!(err.to_string().contains("gauge requires value"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub failures: Vec<Failure>,
}

impl ValidationError {
    /// A validation error that is not tied to a particular metric, such as a
    /// payload that could not be parsed at all.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            failures: vec![Failure {
                index: None,
                id: reason.into(),
                violations: Vec::new(),
            }],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, failure) in self.failures.iter().enumerate() {
            if n > 0 {
                f.write_str("; ")?;
            }
            if failure.violations.is_empty() {
                write!(f, "{}", failure.id)?;
            } else {
                write!(f, "{failure}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn collect(m: &Metric, checks: &[Check]) -> Vec<Violation> {
    checks.iter().filter_map(|check| check(m).err()).collect()
}

pub fn verify(m: &Metric, checks: &[Check]) -> Result<(), ValidationError> {
    let violations = collect(m, checks);
    if violations.is_empty() {
        return Ok(());
    }
    Err(ValidationError {
        failures: vec![Failure {
            index: None,
            id: m.id.clone(),
            violations,
        }],
    })
}

pub fn verify_batch(batch: &[Metric], checks: &[Check]) -> Result<(), ValidationError> {
    let failures: Vec<Failure> = batch
        .iter()
        .enumerate()
        .filter_map(|(i, m)| {
            let violations = collect(m, checks);
            (!violations.is_empty()).then(|| Failure {
                index: Some(i),
                id: m.id.clone(),
                violations,
            })
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { failures })
    }
}
