use crate::{Collector, Snapshot};
use anyhow::Result;
use rand::Rng;
use vitals_common::types::POLL_COUNT;

/// `RandomValue` gauge in `[0, 1)` and the cumulative `PollCount` counter.
///
/// `PollCount` here is the total number of polls since start; the worker pool
/// turns it into a per-report delta.
#[derive(Debug, Default)]
pub struct Synthetic {
    polls: i64,
}

impl Synthetic {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Collector for Synthetic {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn collect(&mut self) -> Result<Snapshot> {
        self.polls += 1;
        let mut snap = Snapshot::default();
        snap.gauge
            .insert("RandomValue".into(), rand::thread_rng().gen::<f64>());
        snap.counter.insert(POLL_COUNT.into(), self.polls);
        Ok(snap)
    }
}
