//! `sysinfo`-backed CPU, network, and process providers.

use super::{CpuSource, NetworkCounters, NetworkSource, ProcessSample, ProcessSource};
use crate::error::PlatformError;
use std::time::Instant;
use sysinfo::{Networks, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Global CPU usage. The first reading after construction is 0 because
/// sysinfo needs two refreshes to compute a delta; the primed refresh in
/// `new` keeps that window to one tick. Refreshes closer together than
/// `MINIMUM_CPU_UPDATE_INTERVAL` return the previous value.
pub struct SysinfoCpu {
    system: System,
    last_refresh: Option<Instant>,
    usage: f64,
}

impl SysinfoCpu {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            system,
            last_refresh: Some(Instant::now()),
            usage: 0.0,
        }
    }

    fn refresh_due(&self, now: Instant) -> bool {
        self.last_refresh.map_or(true, |last| {
            now.saturating_duration_since(last) >= MINIMUM_CPU_UPDATE_INTERVAL
        })
    }

    fn cpu_usage_at(&mut self, now: Instant) -> Result<f64, PlatformError> {
        if !self.refresh_due(now) {
            return Ok(self.usage);
        }

        self.system.refresh_cpu_usage();
        self.last_refresh = Some(now);

        let usage = f64::from(self.system.global_cpu_usage());
        if !usage.is_finite() {
            return Err(PlatformError::QueryFailed {
                provider: "cpu",
                message: format!("non-finite usage {}", usage),
            });
        }
        self.usage = usage.clamp(0.0, 100.0);
        Ok(self.usage)
    }
}

impl Default for SysinfoCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSource for SysinfoCpu {
    fn cpu_usage(&mut self) -> Result<f64, PlatformError> {
        self.cpu_usage_at(Instant::now())
    }
}

/// Cumulative byte counters summed over every interface.
pub struct SysinfoNetwork;

impl SysinfoNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SysinfoNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSource for SysinfoNetwork {
    fn counters(&mut self) -> Result<NetworkCounters, PlatformError> {
        // Rebuilt per read so interfaces that appear later are counted.
        let networks = Networks::new_with_refreshed_list();
        if networks.list().is_empty() {
            return Err(PlatformError::Unavailable("network interfaces"));
        }

        let (received, transmitted) = networks
            .list()
            .values()
            .fold((0u64, 0u64), |(rx, tx), data| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });

        Ok(NetworkCounters {
            received,
            transmitted,
        })
    }
}

/// Running process enumeration with per-process CPU usage.
pub struct SysinfoProcesses {
    system: System,
}

impl SysinfoProcesses {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        Self { system }
    }
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoProcesses {
    fn processes(&mut self) -> Result<Vec<ProcessSample>, PlatformError> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let samples: Vec<ProcessSample> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSample {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_lowercase(),
                cpu_percent: f64::from(process.cpu_usage()),
            })
            .collect();

        if samples.is_empty() {
            return Err(PlatformError::QueryFailed {
                provider: "process list",
                message: "no processes enumerated".to_string(),
            });
        }

        Ok(samples)
    }
}
