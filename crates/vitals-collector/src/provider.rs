use crate::{Collector, Snapshot};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use vitals_common::lifecycle::Component;
use vitals_common::types::Metric;

/// Owns a collector and the snapshot from its latest successful poll.
pub struct Provider {
    name: String,
    collector: Mutex<Box<dyn Collector>>,
    snapshot: RwLock<Snapshot>,
}

impl Provider {
    pub fn new(collector: impl Collector + 'static) -> Self {
        Self {
            name: collector.name().to_string(),
            collector: Mutex::new(Box::new(collector)),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Samples the collector and replaces the stored snapshot. On error the
    /// previous snapshot is kept.
    pub fn poll(&self) -> Result<()> {
        let fresh = self
            .collector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .collect()?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }

    /// Copy of the current snapshot as a flat batch.
    pub fn metrics(&self) -> Vec<Metric> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_metrics()
    }

    /// Polls every `interval` until `shutdown` fires. The first poll happens
    /// immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll() {
                        tracing::warn!(provider = %self.name, error = %e, "poll failed, keeping previous values");
                    }
                }
            }
        }
        tracing::debug!(provider = %self.name, "provider stopped");
    }
}

/// Every provider of the agent, polled on a shared interval.
pub struct ProviderSet {
    providers: Vec<Arc<Provider>>,
    interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProviderSet {
    pub fn new(interval: Duration) -> Self {
        Self {
            providers: Vec::new(),
            interval,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, collector: impl Collector + 'static) -> Self {
        self.providers.push(Arc::new(Provider::new(collector)));
        self
    }

    pub fn providers(&self) -> &[Arc<Provider>] {
        &self.providers
    }

    /// Union of all provider snapshots. Providers are read one after another,
    /// so values from different providers may come from different polls.
    pub fn metrics(&self) -> Vec<Metric> {
        self.providers.iter().flat_map(|p| p.metrics()).collect()
    }
}

#[async_trait]
impl Component for ProviderSet {
    fn name(&self) -> &str {
        "providers"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for provider in &self.providers {
            tracing::info!(provider = provider.name(), interval_secs = self.interval.as_secs(), "starting provider");
            tasks.push(tokio::spawn(provider.clone().run(self.interval, shutdown.clone())));
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        polls: Arc<AtomicUsize>,
        fail_on: Option<usize>,
    }

    impl Collector for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn collect(&mut self) -> Result<Snapshot> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                anyhow::bail!("sample failed");
            }
            let mut snap = Snapshot::default();
            snap.gauge.insert(format!("only{n}"), n as f64);
            snap.counter.insert("Polls".into(), n as i64);
            Ok(snap)
        }
    }

    fn scripted(fail_on: Option<usize>) -> (Provider, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let provider = Provider::new(Scripted {
            polls: polls.clone(),
            fail_on,
        });
        (provider, polls)
    }

    #[test]
    fn poll_replaces_snapshot_wholesale() {
        let (provider, _) = scripted(None);
        provider.poll().unwrap();
        provider.poll().unwrap();
        let metrics = provider.metrics();
        assert_eq!(
            metrics,
            vec![Metric::gauge("only2", 2.0), Metric::counter("Polls", 2)]
        );
    }

    #[test]
    fn failed_poll_keeps_previous_values() {
        let (provider, _) = scripted(Some(2));
        provider.poll().unwrap();
        assert!(provider.poll().is_err());
        assert_eq!(provider.metrics()[0], Metric::gauge("only1", 1.0));
    }

    #[test]
    fn returned_batch_is_a_copy() {
        let (provider, _) = scripted(None);
        provider.poll().unwrap();
        let before = provider.metrics();
        provider.poll().unwrap();
        assert_eq!(before[1], Metric::counter("Polls", 1));
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_each_tick_and_survives_errors() {
        let (provider, polls) = scripted(Some(2));
        let provider = Arc::new(provider);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(provider.clone().run(Duration::from_secs(2), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.metrics()[1], Metric::counter("Polls", 3));
    }

    #[tokio::test(start_paused = true)]
    async fn set_unions_providers_and_stops() {
        let set = ProviderSet::new(Duration::from_secs(1))
            .with(crate::synthetic::Synthetic::new())
            .with(Scripted {
                polls: Arc::new(AtomicUsize::new(0)),
                fail_on: None,
            });
        let shutdown = CancellationToken::new();
        set.start(shutdown.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let ids: Vec<String> = set.metrics().into_iter().map(|m| m.id).collect();
        assert!(ids.contains(&"RandomValue".to_string()));
        assert!(ids.contains(&"PollCount".to_string()));
        assert!(ids.contains(&"Polls".to_string()));

        shutdown.cancel();
        set.stop().await.unwrap();
    }
}
