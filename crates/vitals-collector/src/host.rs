use crate::{Collector, Snapshot};
use anyhow::Result;
use sysinfo::System;

/// Host memory and per-CPU utilization.
///
/// `CPUutilizationNN` is the share of busy time on CPU `NN` (1-based, two
/// digits) since the previous poll, as a ratio in `[0, 1]`.
pub struct HostCollector {
    system: System,
}

impl HostCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cpu_metric_name(index: usize) -> String {
    format!("CPUutilization{:02}", index + 1)
}

impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn collect(&mut self) -> Result<Snapshot> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut snap = Snapshot::default();
        snap.gauge
            .insert("TotalMemory".into(), self.system.total_memory() as f64);
        snap.gauge
            .insert("FreeMemory".into(), self.system.free_memory() as f64);

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            anyhow::bail!("no CPU information available");
        }
        for (i, cpu) in cpus.iter().enumerate() {
            let busy = (cpu.cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);
            snap.gauge.insert(cpu_metric_name(i), busy);
        }
        Ok(snap)
    }
}
