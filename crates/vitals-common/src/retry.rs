//! Bounded retry with a fixed backoff schedule.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delays between successive attempts. `n` delays allow `n + 1` attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    delays: Vec<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new([1, 3, 5].map(Duration::from_secs))
    }
}

impl Backoff {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, the schedule runs out, or `cancel` fires during a wait. The
    /// last error is returned in every failure case.
    pub async fn retry<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delays = self.delays.iter();
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !is_retryable(&err) {
                return Err(err);
            }
            let Some(delay) = delays.next() else {
                return Err(err);
            };
            tracing::debug!(delay_ms = delay.as_millis() as u64, "retrying after transient error");
            tokio::select! {
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(*delay) => {}
            }
        }
    }
}
