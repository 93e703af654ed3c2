//! Periodic sampling of process and host statistics.
//!
//! The [`Sampler`] keeps the latest value of every metric it collects. Two probes feed it, each
//! on its own loop:
//!
//! - [`RuntimeProbe`] reads statistics about this process and the system's memory and load, and
//!   bumps the `PollCount` counter and the `RandomValue` gauge
//! - [`HostProbe`] reads per-core CPU utilization along with total and free memory
use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use sysinfo::{CpuExt, Pid, ProcessExt, System, SystemExt};
use telemetry_core::Snapshot;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Counter incremented on every runtime sample.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge set to a fresh random value in `[0, 1)` on every runtime sample.
pub const RANDOM_VALUE: &str = "RandomValue";

/// A source of metric snapshots.
pub trait Monitor: Send + Sync {
    /// Returns a point-in-time copy of the collected metrics.
    fn snapshot(&self) -> Snapshot;
}

#[derive(Default)]
struct Maps {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
}

/// Collects samples from the probes and hands out snapshots of them.
#[derive(Default)]
pub struct Sampler {
    maps: RwLock<Maps>,
}

impl Sampler {
    /// Creates an empty `Sampler`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a runtime sample.
    ///
    /// Sets the given gauges, increments `PollCount` and sets `RandomValue`.
    pub fn record_runtime<I>(&self, gauges: I)
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let random = rand::random::<f64>();

        let mut maps = self.maps.write();
        maps.gauges.extend(gauges);
        maps.gauges.insert(RANDOM_VALUE.to_owned(), random);
        let polls = maps.counters.entry(POLL_COUNT.to_owned()).or_default();
        *polls = polls.wrapping_add(1);
    }

    /// Records a host sample, setting the given gauges.
    pub fn record_host<I>(&self, gauges: I)
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        self.maps.write().gauges.extend(gauges);
    }

    /// Spawns the sampling loops, which run until `token` is cancelled.
    ///
    /// Both loops take their first sample immediately.
    pub fn spawn(
        self: &Arc<Self>,
        poll_interval: Duration,
        token: &CancellationToken,
    ) -> [JoinHandle<()>; 2] {
        [
            tokio::spawn(poll(Arc::clone(self), RuntimeProbe::new(), poll_interval, token.clone())),
            tokio::spawn(poll(Arc::clone(self), HostProbe::new(), poll_interval, token.clone())),
        ]
    }
}

impl Monitor for Sampler {
    fn snapshot(&self) -> Snapshot {
        let maps = self.maps.read();
        Snapshot::new(maps.counters.clone(), maps.gauges.clone())
    }
}

/// A statistics probe feeding a [`Sampler`].
pub trait Probe: Send + 'static {
    /// Name of the probe, for logging.
    const NAME: &'static str;

    /// Takes a sample and records it into `sampler`.
    fn record(&mut self, sampler: &Sampler);
}

async fn poll<P: Probe>(
    sampler: Arc<Sampler>,
    mut probe: P,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        probe.record(&sampler);
    }

    debug!(probe = P::NAME, "Sampling stopped.");
}

/// Reads statistics about this process and the system's memory and load.
pub struct RuntimeProbe {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeProbe {
    /// Creates a probe for the current process.
    pub fn new() -> Self {
        RuntimeProbe { system: System::new(), pid: sysinfo::get_current_pid().ok() }
    }

    /// Reads the current statistics.
    pub fn sample(&mut self) -> Vec<(String, f64)> {
        let mut gauges = Vec::with_capacity(16);
        let mut gauge = |name: &str, value: f64| gauges.push((name.to_owned(), value));

        if let Some(pid) = self.pid {
            if self.system.refresh_process(pid) {
                if let Some(process) = self.system.process(pid) {
                    let disk = process.disk_usage();
                    gauge("ProcessResidentMemory", process.memory() as f64);
                    gauge("ProcessVirtualMemory", process.virtual_memory() as f64);
                    gauge("ProcessCPUUsage", f64::from(process.cpu_usage()));
                    gauge("ProcessRunTime", process.run_time() as f64);
                    gauge("ProcessDiskRead", disk.total_read_bytes as f64);
                    gauge("ProcessDiskWritten", disk.total_written_bytes as f64);
                }
            }
        }

        self.system.refresh_memory();
        gauge("UsedMemory", self.system.used_memory() as f64);
        gauge("AvailableMemory", self.system.available_memory() as f64);
        gauge("TotalSwap", self.system.total_swap() as f64);
        gauge("UsedSwap", self.system.used_swap() as f64);

        let load = self.system.load_average();
        gauge("LoadAverage1", load.one);
        gauge("LoadAverage5", load.five);
        gauge("LoadAverage15", load.fifteen);

        gauges
    }
}

impl Default for RuntimeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for RuntimeProbe {
    const NAME: &'static str = "runtime";

    fn record(&mut self, sampler: &Sampler) {
        sampler.record_runtime(self.sample());
    }
}

/// Reads per-core CPU utilization along with total and free memory.
pub struct HostProbe {
    system: System,
}

impl HostProbe {
    /// Creates a probe for this host.
    pub fn new() -> Self {
        HostProbe { system: System::new() }
    }

    /// Reads the current statistics.
    ///
    /// CPU utilization is measured since the previous sample, so the first sample reports it as
    /// zero.
    pub fn sample(&mut self) -> Vec<(String, f64)> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let mut gauges: Vec<(String, f64)> = self
            .system
            .cpus()
            .iter()
            .enumerate()
            .map(|(i, cpu)| (format!("CPUutilization{}", i + 1), f64::from(cpu.cpu_usage())))
            .collect();
        gauges.push(("TotalMemory".to_owned(), self.system.total_memory() as f64));
        gauges.push(("FreeMemory".to_owned(), self.system.free_memory() as f64));
        gauges
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for HostProbe {
    const NAME: &'static str = "host";

    fn record(&mut self, sampler: &Sampler) {
        sampler.record_host(self.sample());
    }
}
