//! NVML-backed GPU provider.
//!
//! NVML is loaded at runtime; on machines without an NVIDIA driver the
//! provider reports `Unavailable` and retries initialisation at most once a
//! minute instead of on every poll.

use super::{GpuReading, GpuSource};
use crate::error::PlatformError;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const INIT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

pub struct NvmlGpu {
    nvml: Option<Nvml>,
    last_init_attempt: Option<Instant>,
}

impl NvmlGpu {
    pub fn new() -> Self {
        let mut gpu = Self {
            nvml: None,
            last_init_attempt: None,
        };
        gpu.try_init();
        gpu
    }

    fn try_init(&mut self) {
        self.last_init_attempt = Some(Instant::now());
        match Nvml::init() {
            Ok(nvml) => match nvml.device_count() {
                Ok(count) if count > 0 => {
                    info!("NVML initialised with {} device(s)", count);
                    self.nvml = Some(nvml);
                }
                Ok(_) => debug!("NVML initialised but reports no devices"),
                Err(e) => debug!("NVML device count failed: {}", e),
            },
            Err(e) => debug!("NVML not available: {}", e),
        }
    }
}

impl Default for NvmlGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuSource for NvmlGpu {
    fn read(&mut self) -> Result<GpuReading, PlatformError> {
        if self.nvml.is_none() {
            let retry_due = self
                .last_init_attempt
                .map_or(true, |t| t.elapsed() >= INIT_RETRY_INTERVAL);
            if retry_due {
                self.try_init();
            }
        }

        let nvml = self.nvml.as_ref().ok_or(PlatformError::Unavailable("NVML"))?;
        let device = nvml
            .device_by_index(0)
            .map_err(|e| PlatformError::QueryFailed {
                provider: "NVML",
                message: e.to_string(),
            })?;

        let load = device
            .utilization_rates()
            .map(|u| f64::from(u.gpu))
            .map_err(|e| PlatformError::QueryFailed {
                provider: "NVML",
                message: e.to_string(),
            })?;

        let temperature = device
            .temperature(TemperatureSensor::Gpu)
            .map(f64::from)
            .ok();

        let memory_utilization = device.memory_info().ok().and_then(|m| {
            if m.total > 0 {
                Some(m.used as f64 / m.total as f64)
            } else {
                None
            }
        });

        Ok(GpuReading {
            load,
            temperature,
            memory_utilization,
            name: device.name().ok(),
        })
    }
}
