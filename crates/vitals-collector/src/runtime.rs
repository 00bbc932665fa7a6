use crate::alloc;
use crate::{Collector, Snapshot};
use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Names of the runtime gauges, in the order they are documented.
pub const RUNTIME_GAUGES: [&str; 27] = [
    "Alloc",
    "BuckHashSys",
    "Frees",
    "GCCPUFraction",
    "GCSys",
    "HeapAlloc",
    "HeapIdle",
    "HeapInuse",
    "HeapObjects",
    "HeapReleased",
    "HeapSys",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "Mallocs",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "OtherSys",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
    "Sys",
    "TotalAlloc",
];

/// Memory statistics of the agent process itself.
///
/// Heap figures come from [`alloc::CountingAllocator`]; `Sys` and `HeapSys`
/// are the process's virtual and resident sizes. Garbage-collector figures
/// have no counterpart and are reported as zero.
pub struct RuntimeCollector {
    system: System,
    pid: Pid,
}

impl RuntimeCollector {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("resolve own pid: {e}"))?;
        Ok(Self {
            system: System::new(),
            pid,
        })
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Snapshot> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not found", self.pid))?;

        let heap = alloc::stats();
        let sys = process.virtual_memory();
        let heap_sys = process.memory();
        let heap_inuse = heap.live_bytes;

        let mut snap = Snapshot::default();
        for name in RUNTIME_GAUGES {
            snap.gauge.insert(name.to_string(), 0.0);
        }
        let mut set = |name: &str, value: u64| {
            snap.gauge.insert(name.to_string(), value as f64);
        };
        set("Alloc", heap.live_bytes);
        set("HeapAlloc", heap.live_bytes);
        set("HeapInuse", heap_inuse);
        set("HeapObjects", heap.live_objects());
        set("TotalAlloc", heap.total_bytes);
        set("Mallocs", heap.mallocs);
        set("Frees", heap.frees);
        set("Sys", sys);
        set("HeapSys", heap_sys);
        set("HeapIdle", heap_sys.saturating_sub(heap_inuse));
        set("OtherSys", sys.saturating_sub(heap_sys));
        Ok(snap)
    }
}
