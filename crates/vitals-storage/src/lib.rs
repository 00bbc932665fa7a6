//! Metric storage for the vitals server.
//!
//! Two backends implement [`Storage`]: [`memory::MemStorage`] keeps both maps
//! in process and optionally snapshots them to a file, and
//! [`relational::DbStorage`] upserts into `gauge` / `counter` tables through
//! SeaORM with retried transactions. Both are lifecycle components: `start`
//! restores or migrates, `stop` flushes and closes.

pub mod error;
pub mod file;
pub mod memory;
pub mod relational;


pub use error::{Result, StorageError};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vitals_common::lifecycle::Component;

/// Gauge and counter persistence.
///
/// Gauge writes replace the stored value; counter writes add the delta to it.
/// Implementations are shared between the HTTP and gRPC handlers and must be
/// safe for concurrent use.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `value` and returns it.
    async fn update_gauge_by_name(&self, name: &str, value: f64) -> Result<f64>;

    /// Adds `delta` and returns the new total.
    async fn update_counter_by_name(&self, name: &str, delta: i64) -> Result<i64>;

    /// Applies every gauge atomically, in order.
    async fn update_gauge_list(&self, gauges: &[(String, f64)]) -> Result<()>;

    /// Applies every counter delta atomically, in order.
    async fn update_counter_list(&self, counters: &[(String, i64)]) -> Result<()>;

    /// # Errors
    ///
    /// [`StorageError::NotFound`] if the gauge was never written.
    async fn gauge(&self, name: &str) -> Result<f64>;

    /// # Errors
    ///
    /// [`StorageError::NotFound`] if the counter was never written.
    async fn counter(&self, name: &str) -> Result<i64>;

    async fn gauges(&self) -> Result<HashMap<String, f64>>;

    async fn counters(&self) -> Result<HashMap<String, i64>>;

    /// Fails if the backend cannot serve requests.
    async fn ping(&self) -> Result<()>;
}

/// A storage together with its lifecycle handle. Both point at the same
/// backend instance.
#[derive(Clone)]
pub struct Backend {
    pub storage: Arc<dyn Storage>,
    pub component: Arc<dyn Component>,
}

impl Backend {
    pub fn new<T: Storage + Component + 'static>(inner: T) -> Self {
        let inner = Arc::new(inner);
        Self {
            storage: inner.clone(),
            component: inner,
        }
    }
}

/// Backend selection. A DSN selects the relational backend; otherwise the
/// in-memory backend is used with the snapshot settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_dsn: Option<String>,
    pub file_path: Option<PathBuf>,
    pub store_interval: Duration,
    pub restore: bool,
}

/// Builds the configured backend. The caller starts it through the
/// supervisor.
pub async fn open(config: &StorageConfig) -> Result<Backend> {
    match config.database_dsn.as_deref().filter(|dsn| !dsn.is_empty()) {
        Some(dsn) => {
            let db = relational::DbStorage::connect(dsn).await?;
            Ok(Backend::new(db))
        }
        None => {
            let mem = memory::MemStorage::new(memory::MemConfig {
                file_path: config.file_path.clone(),
                store_interval: config.store_interval,
                restore: config.restore,
            })?;
            Ok(Backend::new(mem))
        }
    }
}
