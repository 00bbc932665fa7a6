//! vitals agent: samples process and host metrics and ships them to the
//! server.
//!
//! Providers poll on their own tickers, the [`report::ReportGenerator`] turns
//! their snapshots into one batch per report interval, and the
//! [`worker::WorkerPool`] splits each batch into chunks and delivers them in
//! parallel over HTTP or gRPC.

pub mod config;
pub mod report;
pub mod transport;
pub mod worker;

use anyhow::Result;
use async_trait::async_trait;
use report::ReportGenerator;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitals_collector::ProviderSet;
use vitals_common::lifecycle::Component;
use worker::{Pipeline, WorkerPool};

/// Report generator and worker pool as one lifecycle component.
pub struct Reporter {
    providers: Arc<ProviderSet>,
    report_interval: Duration,
    rate_limit: usize,
    pipeline: Mutex<Option<Pipeline>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Reporter {
    pub fn new(providers: Arc<ProviderSet>, report_interval: Duration, rate_limit: usize, pipeline: Pipeline) -> Self {
        Self {
            providers,
            report_interval,
            rate_limit,
            pipeline: Mutex::new(Some(pipeline)),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Component for Reporter {
    fn name(&self) -> &str {
        "reporter"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let pipeline = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow::anyhow!("reporter already started"))?;

        let generator = ReportGenerator::new(self.providers.clone(), self.report_interval);
        let (batches, generator_task) = generator.spawn(shutdown.clone());
        let pool = WorkerPool::new(self.rate_limit, pipeline);
        let pool_task = tokio::spawn(async move {
            pool.run(batches, shutdown).await;
        });

        tracing::info!(
            report_interval_secs = self.report_interval.as_secs(),
            rate_limit = self.rate_limit,
            "reporting started"
        );
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([generator_task, pool_task]);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.await?;
        }
        Ok(())
    }
}
