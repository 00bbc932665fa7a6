use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use vitals_collector::ProviderSet;
use vitals_common::types::MetricBatch;

/// Emits the union of all provider snapshots every report interval.
///
/// The output channel holds a single batch, so a slow worker pool delays the
/// next report instead of queueing old ones.
pub struct ReportGenerator {
    providers: Arc<ProviderSet>,
    interval: Duration,
}

impl ReportGenerator {
    pub fn new(providers: Arc<ProviderSet>, interval: Duration) -> Self {
        Self { providers, interval }
    }

    /// Starts the report loop. The receiver closes when the loop exits.
    pub fn spawn(self, shutdown: CancellationToken) -> (mpsc::Receiver<MetricBatch>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(tx, shutdown));
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<MetricBatch>, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let batch = self.providers.metrics();
            if batch.is_empty() {
                tracing::debug!("nothing collected yet, skipping report");
                continue;
            }
            tracing::debug!(metrics = batch.len(), "report ready");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        tracing::warn!("worker pool is gone, stopping reports");
                        break;
                    }
                }
            }
        }
        tracing::info!("report generator stopped");
    }
}
