//! Measured FPS sources: the shared-memory frame publisher and the
//! per-process render-engine busy counters.

use super::heuristics::{piecewise, thermal_factor, vendor_curve};
use super::{EstimateContext, FpsCandidate, FpsEstimator};
use crate::error::EstimateError;
use crate::platform::{EngineCounterSource, FrameEntry, FrameSource};
use crate::registry::normalize_process_name;
use std::time::{Duration, Instant};

pub const SHARED_MEMORY_WEIGHT: f64 = 1.0;
pub const ENGINE_COUNTER_WEIGHT: f64 = 0.95;

/// Reads the overlay's published frame rate. Authoritative when present.
pub struct SharedMemoryEstimator {
    frames: Box<dyn FrameSource>,
}

impl SharedMemoryEstimator {
    pub fn new(frames: Box<dyn FrameSource>) -> Self {
        Self { frames }
    }
}

/// Match by pid, then by process-name substring, else the highest-FPS entry.
pub fn select_entry<'a>(
    entries: &'a [FrameEntry],
    pid: Option<u32>,
    process_name: Option<&str>,
) -> Option<&'a FrameEntry> {
    if let Some(pid) = pid {
        if let Some(entry) = entries.iter().find(|e| e.pid == pid) {
            return Some(entry);
        }
    }

    if let Some(name) = process_name.map(normalize_process_name).filter(|n| !n.is_empty()) {
        if let Some(entry) = entries.iter().find(|e| e.process_name.contains(&name)) {
            return Some(entry);
        }
    }

    entries
        .iter()
        .filter(|e| e.fps.is_finite())
        .max_by(|a, b| a.fps.total_cmp(&b.fps))
}

impl FpsEstimator for SharedMemoryEstimator {
    fn name(&self) -> &'static str {
        "shared-memory"
    }

    fn weight(&self) -> f64 {
        SHARED_MEMORY_WEIGHT
    }

    fn is_authoritative(&self) -> bool {
        true
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError> {
        let entries = self.frames.entries()?;
        let entry = select_entry(
            &entries,
            ctx.foreground.pid,
            ctx.foreground.process_name.as_deref(),
        )
        .ok_or(EstimateError::Unavailable("published frame entries"))?;

        FpsCandidate::new(entry.fps, SHARED_MEMORY_WEIGHT, true, self.name())
    }
}

/// Below this share of wall time the process is not rendering.
const MIN_BUSY_FRACTION: f64 = 0.02;

/// Share of `elapsed` the engine spent on the process, clamped to [0, 1].
pub fn busy_fraction(busy_delta_ns: u64, elapsed: Duration) -> Option<f64> {
    let wall_ns = elapsed.as_nanos() as f64;
    if wall_ns <= 0.0 {
        return None;
    }
    Some((busy_delta_ns as f64 / wall_ns).clamp(0.0, 1.0))
}

/// Map a process's own render-engine share onto the vendor load curve,
/// with the thermal penalty applied.
pub fn fps_from_busy(fraction: f64, gpu_name: Option<&str>, temp: Option<f64>) -> f64 {
    piecewise(vendor_curve(gpu_name), fraction.clamp(0.0, 1.0) * 100.0) * thermal_factor(temp)
}

/// Differences two reads of the foreground process's render-engine busy
/// time taken `interval` apart. Unlike the load heuristics it only sees the
/// game's own GPU work.
pub struct EngineCounterEstimator {
    counters: Box<dyn EngineCounterSource>,
    interval: Duration,
}

impl EngineCounterEstimator {
    pub fn new(counters: Box<dyn EngineCounterSource>, interval: Duration) -> Self {
        Self { counters, interval }
    }
}

impl FpsEstimator for EngineCounterEstimator {
    fn name(&self) -> &'static str {
        "engine-counters"
    }

    fn weight(&self) -> f64 {
        ENGINE_COUNTER_WEIGHT
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError> {
        let pid = ctx.foreground.pid;
        let name = ctx.foreground.process_name.as_deref();
        if pid.is_none() && name.is_none() {
            return Err(EstimateError::Unavailable("foreground process"));
        }
        if ctx.budget_left() < self.interval {
            return Err(EstimateError::BudgetExhausted);
        }

        let first = self
            .counters
            .busy_time_ns(pid, name)
            .map_err(|e| EstimateError::Transient(e.to_string()))?;
        let started = Instant::now();
        std::thread::sleep(self.interval);

        let second = self
            .counters
            .busy_time_ns(pid, name)
            .map_err(|e| EstimateError::Transient(e.to_string()))?;

        if second < first {
            return Err(EstimateError::Transient(
                "engine busy time went backwards".to_string(),
            ));
        }
        let fraction = busy_fraction(second - first, started.elapsed())
            .ok_or_else(|| EstimateError::Transient("zero sample window".to_string()))?;
        if fraction < MIN_BUSY_FRACTION {
            return Err(EstimateError::Unavailable("render work from the foreground process"));
        }

        let t = ctx.telemetry;
        let fps = fps_from_busy(fraction, t.gpu_name.as_deref(), t.gpu_temp);
        FpsCandidate::new(fps, ENGINE_COUNTER_WEIGHT, false, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fps::testing::{context, snapshot};
    use crate::inspector::ForegroundContext;
    use crate::platform::fake::{FakeCounters, FakeFrames};
    use crate::platform::Unavailable;

    fn entry(pid: u32, name: &str, fps: f64) -> FrameEntry {
        FrameEntry {
            pid,
            process_name: name.to_string(),
            fps,
        }
    }

    fn foreground(pid: Option<u32>, name: Option<&str>) -> ForegroundContext {
        ForegroundContext {
            process_name: name.map(str::to_string),
            window_title: None,
            pid,
            is_fullscreen: true,
        }
    }

    #[test]
    fn test_select_entry_prefers_pid_then_name_then_best() {
        let entries = vec![
            entry(10, "c:\\games\\dota2.exe", 90.0),
            entry(20, "c:\\games\\cs2.exe", 240.0),
            entry(30, "c:\\tools\\viewer.exe", 300.0),
        ];

        assert_eq!(select_entry(&entries, Some(10), Some("cs2.exe")).unwrap().pid, 10);
        assert_eq!(select_entry(&entries, Some(99), Some("CS2.exe")).unwrap().pid, 20);
        assert_eq!(select_entry(&entries, None, Some("unknown.exe")).unwrap().pid, 30);
        assert!(select_entry(&[], Some(1), None).is_none());
    }

    #[test]
    fn test_shared_memory_candidate_is_authoritative() {
        let mut estimator = SharedMemoryEstimator::new(Box::new(FakeFrames(Some(vec![entry(
            4242,
            "game.exe",
            143.7,
        )]))));
        let fg = foreground(Some(4242), Some("game.exe"));
        let telemetry = snapshot(None, None, None, None);

        let candidate = estimator.estimate(&context(&fg, &telemetry, 60.0, false)).unwrap();
        assert!(candidate.authoritative);
        assert_eq!(candidate.value, 143.7);
    }

    #[test]
    fn test_shared_memory_missing_and_out_of_range() {
        let fg = foreground(Some(1), None);
        let telemetry = snapshot(None, None, None, None);
        let ctx = context(&fg, &telemetry, 60.0, true);

        let mut absent = SharedMemoryEstimator::new(Box::new(Unavailable("frames")));
        assert!(matches!(absent.estimate(&ctx), Err(EstimateError::Unavailable(_))));

        let mut wild = SharedMemoryEstimator::new(Box::new(FakeFrames(Some(vec![entry(1, "g.exe", 900.0)]))));
        assert_eq!(wild.estimate(&ctx), Err(EstimateError::OutOfRange(900.0)));
    }

    #[test]
    fn test_busy_fraction_and_mapping() {
        assert_eq!(busy_fraction(50_000_000, Duration::from_millis(100)), Some(0.5));
        assert_eq!(busy_fraction(500_000_000, Duration::from_millis(100)), Some(1.0));
        assert_eq!(busy_fraction(10, Duration::ZERO), None);

        // NVIDIA curve: 60% -> 120 fps, 100% -> 50 fps.
        let nvidia = Some("NVIDIA GeForce RTX 3080");
        assert!((fps_from_busy(0.6, nvidia, None) - 120.0).abs() < 1e-9);
        assert!((fps_from_busy(1.0, nvidia, None) - 50.0).abs() < 1e-9);
        // Throttling above 90 C costs 20%.
        assert!((fps_from_busy(0.6, nvidia, Some(92.0)) - 96.0).abs() < 1e-9);
    }

    #[test]
    fn test_engine_counters_difference_two_samples() {
        // 40 ms of busy time per read over a 20 ms window saturates.
        let counters = FakeCounters {
            total: Some(1_000_000),
            step: 40_000_000,
        };
        let mut estimator = EngineCounterEstimator::new(Box::new(counters), Duration::from_millis(20));
        let fg = foreground(Some(7), Some("game.exe"));
        let telemetry = snapshot(Some(95.0), None, None, Some("AMD Radeon RX 6800"));

        let candidate = estimator.estimate(&context(&fg, &telemetry, 60.0, false)).unwrap();
        assert!(!candidate.authoritative);
        assert_eq!(candidate.source, "engine-counters");
        // A busy window can only be at or below the full-load end of the curve.
        assert!(candidate.value >= 45.0 - 1e-9 && candidate.value <= 200.0);
    }

    #[test]
    fn test_idle_process_gives_no_candidate() {
        let counters = FakeCounters {
            total: Some(0),
            step: 0,
        };
        let mut estimator = EngineCounterEstimator::new(Box::new(counters), Duration::from_millis(5));
        let fg = foreground(Some(7), None);
        let telemetry = snapshot(None, None, None, None);

        assert!(matches!(
            estimator.estimate(&context(&fg, &telemetry, 60.0, true)),
            Err(EstimateError::Unavailable(_))
        ));
    }

    #[test]
    fn test_engine_counters_respect_deadline() {
        let counters = FakeCounters {
            total: Some(0),
            step: 10,
        };
        let mut estimator = EngineCounterEstimator::new(Box::new(counters), Duration::from_millis(100));
        let fg = foreground(Some(7), None);
        let telemetry = snapshot(None, None, None, None);
        let mut ctx = context(&fg, &telemetry, 60.0, true);
        ctx.deadline = Instant::now() + Duration::from_millis(10);

        let started = Instant::now();
        assert_eq!(estimator.estimate(&ctx), Err(EstimateError::BudgetExhausted));
        // Rejected before sleeping.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_engine_counters_need_a_foreground_process() {
        let mut estimator = EngineCounterEstimator::new(
            Box::new(FakeCounters { total: Some(0), step: 1 }),
            Duration::from_millis(1),
        );
        let fg = ForegroundContext::default();
        let telemetry = snapshot(None, None, None, None);
        assert!(estimator.estimate(&context(&fg, &telemetry, 60.0, true)).is_err());
    }
}
