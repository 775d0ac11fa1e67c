//! In-memory providers for tests.

use super::*;
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct FakeCpu(pub Option<f64>);

impl CpuSource for FakeCpu {
    fn cpu_usage(&mut self) -> Result<f64, PlatformError> {
        self.0.ok_or(PlatformError::Unavailable("fake cpu"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeGpu(pub Option<GpuReading>);

impl FakeGpu {
    pub fn with_load(load: f64) -> Self {
        Self(Some(GpuReading {
            load,
            temperature: Some(65.0),
            memory_utilization: None,
            name: None,
        }))
    }
}

impl GpuSource for FakeGpu {
    fn read(&mut self) -> Result<GpuReading, PlatformError> {
        self.0.clone().ok_or(PlatformError::Unavailable("fake gpu"))
    }
}

/// Replays a queue of counter readings, repeating the last one.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    pub readings: VecDeque<NetworkCounters>,
    last: Option<NetworkCounters>,
}

impl FakeNetwork {
    pub fn new(readings: Vec<(u64, u64)>) -> Self {
        Self {
            readings: readings
                .into_iter()
                .map(|(received, transmitted)| NetworkCounters {
                    received,
                    transmitted,
                })
                .collect(),
            last: None,
        }
    }
}

impl NetworkSource for FakeNetwork {
    fn counters(&mut self) -> Result<NetworkCounters, PlatformError> {
        if let Some(next) = self.readings.pop_front() {
            self.last = Some(next);
        }
        self.last.ok_or(PlatformError::Unavailable("fake network"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeProcesses(pub Option<Vec<ProcessSample>>);

impl FakeProcesses {
    pub fn running(names: &[(&str, f64)]) -> Self {
        Self(Some(
            names
                .iter()
                .enumerate()
                .map(|(i, (name, cpu))| ProcessSample {
                    pid: 1000 + i as u32,
                    name: name.to_string(),
                    cpu_percent: *cpu,
                })
                .collect(),
        ))
    }
}

impl ProcessSource for FakeProcesses {
    fn processes(&mut self) -> Result<Vec<ProcessSample>, PlatformError> {
        self.0
            .clone()
            .ok_or(PlatformError::Unavailable("fake processes"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeForeground(pub Option<ForegroundWindow>);

impl FakeForeground {
    pub fn windowed(process: &str, title: &str) -> Self {
        Self(Some(ForegroundWindow {
            pid: Some(4242),
            process_name: Some(process.to_string()),
            title: Some(title.to_string()),
            rect: Some(WindowRect::new(100, 100, 1380, 820)),
            borderless: false,
        }))
    }

    pub fn fullscreen(process: &str, title: &str) -> Self {
        Self(Some(ForegroundWindow {
            pid: Some(4242),
            process_name: Some(process.to_string()),
            title: Some(title.to_string()),
            rect: Some(WindowRect::new(0, 0, 1920, 1080)),
            borderless: true,
        }))
    }
}

impl ForegroundSource for FakeForeground {
    fn foreground(&mut self) -> Result<Option<ForegroundWindow>, PlatformError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FakeDisplay(pub Option<DisplayMode>);

impl Default for FakeDisplay {
    fn default() -> Self {
        Self(Some(DisplayMode {
            width: 1920,
            height: 1080,
            refresh_hz: 60.0,
        }))
    }
}

impl DisplaySource for FakeDisplay {
    fn primary_mode(&mut self) -> Result<DisplayMode, PlatformError> {
        self.0.ok_or(PlatformError::Unavailable("fake display"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeFrames(pub Option<Vec<FrameEntry>>);

impl FrameSource for FakeFrames {
    fn entries(&mut self) -> Result<Vec<FrameEntry>, ShmError> {
        self.0.clone().ok_or(ShmError::NotAvailable)
    }
}

/// Cumulative busy-time counter that advances by `step` nanoseconds per read.
#[derive(Debug, Clone, Default)]
pub struct FakeCounters {
    pub total: Option<u64>,
    pub step: u64,
}

impl EngineCounterSource for FakeCounters {
    fn busy_time_ns(
        &mut self,
        _pid: Option<u32>,
        _process_name: Option<&str>,
    ) -> Result<u64, PlatformError> {
        let total = self
            .total
            .ok_or(PlatformError::Unavailable("fake counters"))?;
        self.total = Some(total + self.step);
        Ok(total)
    }
}
