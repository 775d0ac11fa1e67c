//! Platform telemetry providers.
//!
//! Every OS or vendor boundary the monitor touches is a trait here, so the
//! classifier and estimators can run against fakes in tests and degrade to
//! "no value" on machines where a source is missing.

pub mod display;
pub mod drm_fdinfo;
pub mod foreground;
pub mod nvidia;
pub mod shm;
pub mod system;

#[cfg(test)]
pub mod fake;

use crate::error::{PlatformError, ShmError};

/// One GPU query result.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuReading {
    /// Utilization in percent (0-100).
    pub load: f64,
    /// Core temperature in Celsius, if the sensor is exposed.
    pub temperature: Option<f64>,
    /// Memory utilization as a ratio (0-1), if exposed.
    pub memory_utilization: Option<f64>,
    /// Marketing name reported by the driver.
    pub name: Option<String>,
}

impl GpuReading {
    /// A reading is usable only when every present field is physically plausible.
    pub fn is_plausible(&self) -> bool {
        let load_ok = self.load.is_finite() && (0.0..=100.0).contains(&self.load);
        let temp_ok = self
            .temperature
            .map_or(true, |t| t.is_finite() && (0.0..=150.0).contains(&t));
        let mem_ok = self
            .memory_utilization
            .map_or(true, |m| m.is_finite() && (0.0..=1.0).contains(&m));
        load_ok && temp_ok && mem_ok
    }
}

/// Cumulative network byte counters across all interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCounters {
    pub received: u64,
    pub transmitted: u64,
}

/// A running process as seen by the process enumerator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    /// Lowercased executable name, e.g. `cs2.exe`.
    pub name: String,
    pub cpu_percent: f64,
}

/// Window rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl WindowRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// Raw foreground window facts as reported by the window system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForegroundWindow {
    pub pid: Option<u32>,
    pub process_name: Option<String>,
    pub title: Option<String>,
    pub rect: Option<WindowRect>,
    /// Popup or borderless style (no caption, no thick frame).
    pub borderless: bool,
}

/// Primary display mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: f64,
}

/// One application entry published by a frame-rate overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub pid: u32,
    /// Lowercased executable path or name as published.
    pub process_name: String,
    pub fps: f64,
}

pub trait CpuSource: Send {
    /// Instantaneous global CPU usage in percent. Must not block.
    fn cpu_usage(&mut self) -> Result<f64, PlatformError>;
}

pub trait GpuSource: Send {
    fn read(&mut self) -> Result<GpuReading, PlatformError>;
}

pub trait NetworkSource: Send {
    fn counters(&mut self) -> Result<NetworkCounters, PlatformError>;
}

pub trait ProcessSource: Send {
    fn processes(&mut self) -> Result<Vec<ProcessSample>, PlatformError>;
}

pub trait ForegroundSource: Send {
    /// `Ok(None)` means no foreground window (desktop, lock screen).
    fn foreground(&mut self) -> Result<Option<ForegroundWindow>, PlatformError>;
}

pub trait DisplaySource: Send {
    fn primary_mode(&mut self) -> Result<DisplayMode, PlatformError>;
}

pub trait FrameSource: Send {
    fn entries(&mut self) -> Result<Vec<FrameEntry>, ShmError>;
}

pub trait EngineCounterSource: Send {
    /// Cumulative 3D-engine busy time of the given process, in nanoseconds,
    /// summed over all of its GPU clients.
    fn busy_time_ns(
        &mut self,
        pid: Option<u32>,
        process_name: Option<&str>,
    ) -> Result<u64, PlatformError>;
}

/// Provider for a source this platform does not have.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable(pub &'static str);

impl CpuSource for Unavailable {
    fn cpu_usage(&mut self) -> Result<f64, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

impl GpuSource for Unavailable {
    fn read(&mut self) -> Result<GpuReading, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

impl NetworkSource for Unavailable {
    fn counters(&mut self) -> Result<NetworkCounters, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

impl ProcessSource for Unavailable {
    fn processes(&mut self) -> Result<Vec<ProcessSample>, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

impl ForegroundSource for Unavailable {
    fn foreground(&mut self) -> Result<Option<ForegroundWindow>, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

impl DisplaySource for Unavailable {
    fn primary_mode(&mut self) -> Result<DisplayMode, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

impl FrameSource for Unavailable {
    fn entries(&mut self) -> Result<Vec<FrameEntry>, ShmError> {
        Err(ShmError::NotAvailable)
    }
}

impl EngineCounterSource for Unavailable {
    fn busy_time_ns(
        &mut self,
        _pid: Option<u32>,
        _process_name: Option<&str>,
    ) -> Result<u64, PlatformError> {
        Err(PlatformError::Unavailable(self.0))
    }
}

/// The full set of providers the sampling loop consumes.
pub struct Platform {
    pub cpu: Box<dyn CpuSource>,
    pub gpu: Box<dyn GpuSource>,
    pub network: Box<dyn NetworkSource>,
    pub processes: Box<dyn ProcessSource>,
    pub foreground: Box<dyn ForegroundSource>,
    pub display: Box<dyn DisplaySource>,
    pub frames: Box<dyn FrameSource>,
    pub counters: Box<dyn EngineCounterSource>,
}

impl Platform {
    /// Build the providers available on this machine. Sources that cannot be
    /// opened are replaced by `Unavailable` and retried lazily where the
    /// back-end supports it.
    pub fn detect() -> Self {
        Self {
            cpu: Box::new(system::SysinfoCpu::new()),
            gpu: Box::new(nvidia::NvmlGpu::new()),
            network: Box::new(system::SysinfoNetwork::new()),
            processes: Box::new(system::SysinfoProcesses::new()),
            foreground: foreground::detect(),
            display: Box::new(display::DrmDisplay::new()),
            frames: Box::new(shm::SharedMemoryFrames::new()),
            counters: drm_fdinfo::detect(),
        }
    }

    /// A platform where every source fails.
    pub fn unavailable() -> Self {
        Self {
            cpu: Box::new(Unavailable("cpu")),
            gpu: Box::new(Unavailable("gpu")),
            network: Box::new(Unavailable("network")),
            processes: Box::new(Unavailable("process list")),
            foreground: Box::new(Unavailable("foreground window")),
            display: Box::new(Unavailable("display")),
            frames: Box::new(Unavailable("frame publisher")),
            counters: Box::new(Unavailable("engine counters")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_reading_plausibility() {
        let reading = GpuReading {
            load: 55.0,
            temperature: Some(70.0),
            memory_utilization: Some(0.4),
            name: None,
        };
        assert!(reading.is_plausible());

        assert!(!GpuReading { load: 130.0, ..reading.clone() }.is_plausible());
        assert!(!GpuReading { load: f64::NAN, ..reading.clone() }.is_plausible());
        assert!(!GpuReading {
            memory_utilization: Some(1.5),
            ..reading.clone()
        }
        .is_plausible());
        assert!(GpuReading {
            temperature: None,
            memory_utilization: None,
            ..reading
        }
        .is_plausible());
    }

    #[test]
    fn test_window_rect_dimensions() {
        let rect = WindowRect::new(0, 0, 1920, 1080);
        assert_eq!(rect.width(), 1920);
        assert_eq!(rect.height(), 1080);
        assert_eq!(WindowRect::new(10, 10, 5, 5).width(), 0);
    }

    #[test]
    fn test_unavailable_platform_fails_every_source() {
        let mut platform = Platform::unavailable();
        assert!(platform.cpu.cpu_usage().is_err());
        assert!(platform.gpu.read().is_err());
        assert!(platform.network.counters().is_err());
        assert!(platform.processes.processes().is_err());
        assert!(platform.foreground.foreground().is_err());
        assert!(platform.display.primary_mode().is_err());
        assert!(matches!(platform.frames.entries(), Err(ShmError::NotAvailable)));
        assert!(platform.counters.busy_time_ns(Some(1), None).is_err());
    }
}
