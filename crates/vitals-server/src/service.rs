//! Metric services behind the HTTP handlers and the gRPC endpoint.
//!
//! Each capability is its own trait so a handler depends only on what it
//! calls. [`MetricService`] implements all of them over a [`Storage`].

use async_trait::async_trait;
use std::sync::Arc;
use vitals_common::types::{format_gauge, Metric, MetricType};
use vitals_common::validate::{verify, verify_batch, ValidationError, READ_CHECKS, UPDATE_CHECKS};
use vitals_storage::{Storage, StorageError};

const PAGE_TEMPLATE: &str = include_str!("../templates/metrics.html");

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} {id:?} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => ServiceError::NotFound { kind, id },
            other => ServiceError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[async_trait]
pub trait Updater: Send + Sync {
    /// Stores one metric and returns it with the stored value: the gauge as
    /// written, or the counter's new total in `delta`.
    async fn update(&self, metric: Metric) -> Result<Metric>;
}

#[async_trait]
pub trait Reader: Send + Sync {
    /// Fills in the stored value of the metric named by `key`.
    async fn read(&self, key: Metric) -> Result<Metric>;
}

#[async_trait]
pub trait BatchUpdater: Send + Sync {
    /// Validates the whole batch, then applies its gauges and its counters,
    /// each list atomically. Returns the number of metrics applied.
    async fn batch_update(&self, batch: Vec<Metric>) -> Result<usize>;
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_page(&self) -> Result<String>;
}

pub struct MetricService {
    storage: Arc<dyn Storage>,
}

impl MetricService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Updater for MetricService {
    async fn update(&self, metric: Metric) -> Result<Metric> {
        verify(&metric, UPDATE_CHECKS)?;
        match (metric.metric_type, metric.value, metric.delta) {
            (MetricType::Gauge, Some(value), _) => {
                let stored = self.storage.update_gauge_by_name(&metric.id, value).await?;
                Ok(Metric::gauge(metric.id, stored))
            }
            (MetricType::Counter, _, Some(delta)) => {
                let total = self.storage.update_counter_by_name(&metric.id, delta).await?;
                Ok(Metric::counter(metric.id, total))
            }
            _ => Err(ValidationError::malformed(format!("metric {:?} cannot be stored", metric.id)).into()),
        }
    }
}

#[async_trait]
impl Reader for MetricService {
    async fn read(&self, key: Metric) -> Result<Metric> {
        verify(&key, READ_CHECKS)?;
        match key.metric_type {
            MetricType::Gauge => {
                let value = self.storage.gauge(&key.id).await?;
                Ok(Metric::gauge(key.id, value))
            }
            MetricType::Counter => {
                let delta = self.storage.counter(&key.id).await?;
                Ok(Metric::counter(key.id, delta))
            }
            MetricType::Unknown => {
                Err(ValidationError::malformed(format!("metric {:?} has no type", key.id)).into())
            }
        }
    }
}

#[async_trait]
impl BatchUpdater for MetricService {
    async fn batch_update(&self, batch: Vec<Metric>) -> Result<usize> {
        verify_batch(&batch, UPDATE_CHECKS)?;
        let total = batch.len();
        let mut gauges = Vec::new();
        let mut counters = Vec::new();
        for m in batch {
            match (m.metric_type, m.value, m.delta) {
                (MetricType::Gauge, Some(v), _) => gauges.push((m.id, v)),
                (MetricType::Counter, _, Some(d)) => counters.push((m.id, d)),
                _ => {
                    return Err(ValidationError::malformed(format!("metric {:?} cannot be stored", m.id)).into())
                }
            }
        }
        if !gauges.is_empty() {
            self.storage.update_gauge_list(&gauges).await?;
        }
        if !counters.is_empty() {
            self.storage.update_counter_list(&counters).await?;
        }
        tracing::debug!(gauges = gauges.len(), counters = counters.len(), "batch applied");
        Ok(total)
    }
}

#[async_trait]
impl HealthChecker for MetricService {
    async fn ping(&self) -> Result<()> {
        Ok(self.storage.ping().await?)
    }
}

#[async_trait]
impl PageRenderer for MetricService {
    async fn render_page(&self) -> Result<String> {
        let (gauges, counters) = tokio::join!(self.storage.gauges(), self.storage.counters());
        let mut lines: Vec<String> = gauges?
            .into_iter()
            .map(|(name, v)| format!("{name}: {}", format_gauge(v)))
            .chain(counters?.into_iter().map(|(name, d)| format!("{name}: {d}")))
            .collect();
        lines.sort();

        let items: String = lines
            .iter()
            .map(|line| format!("<li>{}</li>\n", escape_html(line)))
            .collect();
        Ok(PAGE_TEMPLATE.replace("{{items}}", &items))
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
