//! Chunked, parallel delivery of report batches with PollCount rollback.

use crate::transport::{Envelope, Transport, TransportError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vitals_common::cipher::Encrypter;
use vitals_common::codec::Gzipper;
use vitals_common::sign::Signer;
use vitals_common::types::{Metric, MetricBatch, MetricType, POLL_COUNT};

/// Cumulative PollCount already reported (`latest`) and its value before the
/// batch in flight (`previous`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollLedger {
    previous: i64,
    latest: i64,
}

impl PollLedger {
    /// Rewrites the batch's cumulative PollCount as the increment since the
    /// last successful report. Returns whether a PollCount was found.
    pub fn apply(&mut self, batch: &mut [Metric]) -> bool {
        let Some(poll) = batch
            .iter_mut()
            .find(|m| m.metric_type == MetricType::Counter && m.id == POLL_COUNT)
        else {
            return false;
        };
        let current = poll.delta.unwrap_or(self.latest);
        self.previous = self.latest;
        poll.delta = Some(current - self.latest);
        self.latest = current;
        true
    }

    /// Forgets the increment of the failed batch so the next one re-reports
    /// it.
    pub fn rollback(&mut self) {
        self.latest = self.previous;
    }

    pub fn latest(&self) -> i64 {
        self.latest
    }
}

/// Splits `batch` into at most `n` chunks. Chunks are `len / n` long with the
/// remainder added to the last one; with `len <= n` every metric is its own
/// chunk.
pub fn partition(batch: Vec<Metric>, n: usize) -> Vec<Vec<Metric>> {
    let n = n.max(1);
    if batch.len() <= n {
        return batch.into_iter().map(|m| vec![m]).collect();
    }
    let size = batch.len() / n;
    let mut rest = batch;
    let mut chunks = Vec::with_capacity(n);
    for _ in 0..n - 1 {
        let tail = rest.split_off(size);
        chunks.push(rest);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}

/// Serialize, sign, compress, encrypt, send.
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    signer: Option<Signer>,
    encrypter: Option<Encrypter>,
    gzip: Gzipper,
    real_ip: Option<String>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            signer: None,
            encrypter: None,
            gzip: Gzipper::default(),
            real_ip: None,
        }
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_encrypter(mut self, encrypter: Option<Encrypter>) -> Self {
        self.encrypter = encrypter;
        self
    }

    pub fn with_real_ip(mut self, real_ip: Option<String>) -> Self {
        self.real_ip = real_ip;
        self
    }

    pub fn seal(&self, chunk: &[Metric]) -> Result<Envelope, TransportError> {
        let payload = self.transport.encode(chunk)?;
        let hash = self.signer.as_ref().map(|s| s.sign(&payload));
        let compressed = self.gzip.compress(&payload)?;
        let body = match &self.encrypter {
            Some(enc) => enc.encrypt(&compressed)?,
            None => compressed,
        };
        Ok(Envelope {
            body,
            hash,
            real_ip: self.real_ip.clone(),
        })
    }

    pub async fn deliver(&self, chunk: Vec<Metric>) -> Result<(), TransportError> {
        let envelope = self.seal(&chunk)?;
        self.transport.send(envelope).await
    }
}

pub struct WorkerPool {
    rate_limit: usize,
    pipeline: Arc<Pipeline>,
    ledger: PollLedger,
}

impl WorkerPool {
    pub fn new(rate_limit: usize, pipeline: Pipeline) -> Self {
        Self {
            rate_limit: rate_limit.max(1),
            pipeline: Arc::new(pipeline),
            ledger: PollLedger::default(),
        }
    }

    pub fn ledger(&self) -> PollLedger {
        self.ledger
    }

    /// Consumes batches until the channel closes or `shutdown` fires, and
    /// returns the final ledger. A failed batch is dropped; its PollCount
    /// increment rides on the next one.
    pub async fn run(mut self, mut batches: mpsc::Receiver<MetricBatch>, shutdown: CancellationToken) -> PollLedger {
        let mut dropped = 0usize;
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            match self.process(batch, &shutdown).await {
                Ok(()) => {}
                Err(TransportError::Cancelled) => break,
                Err(e) => {
                    dropped += 1;
                    tracing::debug!(error = %e, dropped, "report dropped, waiting for the next one");
                }
            }
        }
        tracing::info!(
            reported_poll_count = self.ledger.latest(),
            dropped_reports = dropped,
            "worker pool stopped"
        );
        self.ledger
    }

    /// Sends one batch. If any chunk fails, the PollCount increment is rolled
    /// back and the first error is returned.
    pub async fn process(&mut self, mut batch: MetricBatch, shutdown: &CancellationToken) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let tracked = self.ledger.apply(&mut batch);
        let total = batch.len();

        let mut tasks = JoinSet::new();
        for chunk in partition(batch, self.rate_limit) {
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move { pipeline.deliver(chunk).await });
        }

        let mut first_error = None;
        let mut failed = 0usize;
        loop {
            let joined = tokio::select! {
                _ = shutdown.cancelled() => {
                    tasks.abort_all();
                    first_error.get_or_insert(TransportError::Cancelled);
                    failed += tasks.len();
                    break;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            let outcome = joined.unwrap_or_else(|e| Err(TransportError::Worker(e.to_string())));
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "failed to deliver chunk");
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                tracing::debug!(metrics = total, "report delivered");
                Ok(())
            }
            Some(e) => {
                if tracked {
                    self.ledger.rollback();
                }
                tracing::warn!(failed_chunks = failed, poll_count = self.ledger.latest(), "report incomplete, PollCount rolled back");
                Err(e)
            }
        }
    }
}
