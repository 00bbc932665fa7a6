use crate::error::{Result, StorageError};
use crate::file::FileOperator;
use crate::Storage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use vitals_common::lifecycle::Component;

/// Snapshot layout on disk: `{"counter":{...},"gauge":{...}}`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub counter: HashMap<String, i64>,
    #[serde(default)]
    pub gauge: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct MemConfig {
    /// `None` (or an empty path) disables snapshots.
    pub file_path: Option<PathBuf>,
    /// Zero saves after every mutation.
    pub store_interval: Duration,
    pub restore: bool,
}

struct Inner {
    state: RwLock<State>,
    file: Option<Mutex<FileOperator>>,
}

impl Inner {
    fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let data = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_vec(&*state)?
        };
        file.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .save(&data)?;
        Ok(())
    }

    fn with_file<R>(&self, f: impl FnOnce(&mut FileOperator) -> std::io::Result<R>) -> Result<Option<R>> {
        match &self.file {
            Some(file) => Ok(Some(f(&mut file.lock().unwrap_or_else(PoisonError::into_inner))?)),
            None => Ok(None),
        }
    }
}

/// In-process maps with optional file snapshots.
///
/// With a zero store interval every mutation is followed by a save (errors
/// are logged, the mutation stands). Otherwise a background task saves on
/// the interval and `stop` saves once more.
pub struct MemStorage {
    inner: Arc<Inner>,
    store_interval: Duration,
    restore_on_start: bool,
    saver: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MemStorage {
    pub fn new(config: MemConfig) -> Result<Self> {
        let file = match config.file_path.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => Some(Mutex::new(FileOperator::open(path)?)),
            None => None,
        };
        Ok(Self::with_parts(file, config.store_interval, config.restore))
    }

    /// Storage without persistence.
    pub fn ephemeral() -> Self {
        Self::with_parts(None, Duration::ZERO, false)
    }

    fn with_parts(file: Option<Mutex<FileOperator>>, store_interval: Duration, restore: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                file,
            }),
            store_interval,
            restore_on_start: restore,
            saver: Mutex::new(None),
        }
    }

    fn is_sync(&self) -> bool {
        self.store_interval.is_zero()
    }

    /// Writes the current state to the snapshot file.
    pub fn save(&self) -> Result<()> {
        self.inner.save()
    }

    /// Loads the snapshot file into memory. An empty file leaves the maps
    /// empty.
    pub fn restore(&self) -> Result<()> {
        let Some(data) = self.inner.with_file(|f| f.load())? else {
            return Ok(());
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let restored: State = serde_json::from_slice(&data)?;
        tracing::info!(
            gauges = restored.gauge.len(),
            counters = restored.counter.len(),
            "restored metrics snapshot"
        );
        *self.inner.state.write().unwrap_or_else(PoisonError::into_inner) = restored;
        Ok(())
    }

    /// Copy of both maps.
    pub fn snapshot(&self) -> State {
        self.read(State::clone)
    }

    fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let out = f(&mut self.inner.state.write().unwrap_or_else(PoisonError::into_inner));
        if self.is_sync() {
            if let Err(e) = self.inner.save() {
                tracing::error!(error = %e, "failed to save metrics snapshot");
            }
        }
        out
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}

fn add(total: &mut i64, delta: i64) -> i64 {
    *total = total.wrapping_add(delta);
    *total
}

#[async_trait]
impl Storage for MemStorage {
    async fn update_gauge_by_name(&self, name: &str, value: f64) -> Result<f64> {
        self.write(|s| s.gauge.insert(name.to_string(), value));
        Ok(value)
    }

    async fn update_counter_by_name(&self, name: &str, delta: i64) -> Result<i64> {
        Ok(self.write(|s| add(s.counter.entry(name.to_string()).or_insert(0), delta)))
    }

    async fn update_gauge_list(&self, gauges: &[(String, f64)]) -> Result<()> {
        if gauges.is_empty() {
            return Ok(());
        }
        self.write(|s| {
            for (name, value) in gauges {
                s.gauge.insert(name.clone(), *value);
            }
        });
        Ok(())
    }

    async fn update_counter_list(&self, counters: &[(String, i64)]) -> Result<()> {
        if counters.is_empty() {
            return Ok(());
        }
        self.write(|s| {
            for (name, delta) in counters {
                add(s.counter.entry(name.clone()).or_insert(0), *delta);
            }
        });
        Ok(())
    }

    async fn gauge(&self, name: &str) -> Result<f64> {
        self.read(|s| s.gauge.get(name).copied())
            .ok_or_else(|| StorageError::NotFound {
                kind: "gauge",
                id: name.to_string(),
            })
    }

    async fn counter(&self, name: &str) -> Result<i64> {
        self.read(|s| s.counter.get(name).copied())
            .ok_or_else(|| StorageError::NotFound {
                kind: "counter",
                id: name.to_string(),
            })
    }

    async fn gauges(&self) -> Result<HashMap<String, f64>> {
        Ok(self.read(|s| s.gauge.clone()))
    }

    async fn counters(&self) -> Result<HashMap<String, i64>> {
        Ok(self.read(|s| s.counter.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Component for MemStorage {
    fn name(&self) -> &str {
        "memory-storage"
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        if self.inner.file.is_none() {
            tracing::info!("snapshot persistence disabled");
            return Ok(());
        }
        if self.restore_on_start {
            self.restore()?;
        } else {
            self.inner.with_file(|f| f.clear())?;
        }
        if self.is_sync() {
            tracing::info!("saving snapshot after every update");
            return Ok(());
        }

        let cancel = shutdown.child_token();
        let inner = self.inner.clone();
        let period = self.store_interval;
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match inner.save() {
                            Ok(()) => tracing::debug!("metrics snapshot saved"),
                            Err(e) => tracing::error!(error = %e, "failed to save metrics snapshot"),
                        }
                    }
                }
            }
        });
        tracing::info!(interval_secs = period.as_secs(), "saving snapshot periodically");
        *self.saver.lock().unwrap_or_else(PoisonError::into_inner) = Some((cancel, handle));
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let saver = self.saver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((cancel, handle)) = saver {
            cancel.cancel();
            handle.await?;
        }
        if self.inner.file.is_some() {
            self.save()?;
            self.inner.with_file(|f| f.close())?;
            tracing::info!("metrics snapshot flushed");
        }
        Ok(())
    }
}
