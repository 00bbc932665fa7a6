//! Metric sources for the vitals agent.
//!
//! Each [`Collector`] samples one family of metrics (process runtime, host
//! memory and CPU, synthetic values) and returns a [`Snapshot`]. A
//! [`Provider`] owns a collector, polls it on its own ticker and keeps the
//! latest snapshot; a [`ProviderSet`] unions every provider into one batch.

pub mod alloc;
pub mod host;
mod provider;
pub mod runtime;
pub mod synthetic;

pub use provider::{Provider, ProviderSet};

use anyhow::Result;
use std::collections::HashMap;
use vitals_common::types::Metric;

/// Point-in-time values produced by one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub gauge: HashMap<String, f64>,
    pub counter: HashMap<String, i64>,
}

impl Snapshot {
    /// Flattens into metrics, gauges first, each group sorted by name.
    pub fn to_metrics(&self) -> Vec<Metric> {
        let mut gauges: Vec<_> = self.gauge.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        let mut counters: Vec<_> = self.counter.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));

        gauges
            .into_iter()
            .map(|(id, v)| Metric::gauge(id.as_str(), *v))
            .chain(counters.into_iter().map(|(id, d)| Metric::counter(id.as_str(), *d)))
            .collect()
    }
}

/// A metric source polled by a [`Provider`].
///
/// `collect` takes `&mut self` so sources can keep sampling state (sysinfo
/// handles, running counters) between polls.
pub trait Collector: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails. The provider
    /// logs it and keeps the previous snapshot.
    fn collect(&mut self) -> Result<Snapshot>;
}
