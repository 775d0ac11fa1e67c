//! Telemetry values shared between the sampling loop and its consumers.

use crate::config::Settings;
use crate::platform::NetworkCounters;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Last-known-good telemetry, as seen by the classifier and estimators.
///
/// GPU fields stay `None` until a plausible reading arrives so that
/// "unknown" is never confused with "0%".
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    /// Global CPU usage in percent.
    pub cpu_usage: f64,
    /// GPU utilization in percent.
    pub gpu_load: Option<f64>,
    /// GPU core temperature in Celsius.
    pub gpu_temp: Option<f64>,
    /// GPU memory utilization as a ratio (0-1).
    pub gpu_mem_util: Option<f64>,
    pub gpu_name: Option<String>,
    /// Download throughput in bytes per second.
    pub net_down: f64,
    /// Upload throughput in bytes per second.
    pub net_up: f64,
    pub timestamp: Instant,
}

impl TelemetrySnapshot {
    pub fn empty(timestamp: Instant) -> Self {
        Self {
            cpu_usage: 0.0,
            gpu_load: None,
            gpu_temp: None,
            gpu_mem_util: None,
            gpu_name: None,
            net_down: 0.0,
            net_up: 0.0,
            timestamp,
        }
    }

    /// GPU memory utilization in percent.
    pub fn gpu_mem_percent(&self) -> Option<f64> {
        self.gpu_mem_util.map(|m| m * 100.0)
    }
}

/// Event published to presentation, tray, and logging consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub cpu_usage: f64,
    pub gpu_temp: f64,
    pub gpu_load: f64,
    pub net_down: f64,
    pub net_up: f64,
    pub is_gaming: bool,
    /// Displayed frame rate; 0 means no estimate.
    pub fps: f64,
}

impl MonitorEvent {
    /// Build the outbound event, applying the fps visibility settings.
    pub fn new(
        snapshot: &TelemetrySnapshot,
        is_gaming: bool,
        fps: f64,
        settings: &Settings,
    ) -> Self {
        let fps = if !settings.show_fps || (settings.fps_only_in_game && !is_gaming) {
            0.0
        } else if fps.is_finite() {
            fps.max(0.0)
        } else {
            0.0
        };

        Self {
            cpu_usage: snapshot.cpu_usage,
            gpu_temp: snapshot.gpu_temp.unwrap_or(0.0),
            gpu_load: snapshot.gpu_load.unwrap_or(0.0),
            net_down: snapshot.net_down,
            net_up: snapshot.net_up,
            is_gaming,
            fps,
        }
    }
}

/// Weight of the previous rate when blending in a new delta.
const PREVIOUS_RATE_WEIGHT: f64 = 0.7;

/// Network throughput from cumulative byte counters.
#[derive(Debug, Default)]
pub struct NetworkMeter {
    baseline: Option<(NetworkCounters, Instant)>,
    rates: Option<(f64, f64)>,
}

impl NetworkMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a counter reading. Returns `(down, up)` in bytes per second once
    /// a baseline exists; the first reading and counter resets only
    /// (re)establish the baseline.
    pub fn update(&mut self, counters: NetworkCounters, now: Instant) -> Option<(f64, f64)> {
        let Some((previous, at)) = self.baseline else {
            self.baseline = Some((counters, now));
            return None;
        };

        if counters.received < previous.received || counters.transmitted < previous.transmitted {
            tracing::debug!("Network counters went backwards, re-baselining");
            self.baseline = Some((counters, now));
            return None;
        }

        let elapsed = now.saturating_duration_since(at).as_secs_f64();
        if elapsed <= 0.0 {
            return self.rates;
        }

        let down = (counters.received - previous.received) as f64 / elapsed;
        let up = (counters.transmitted - previous.transmitted) as f64 / elapsed;
        self.baseline = Some((counters, now));

        let blended = match self.rates {
            Some((prev_down, prev_up)) => (
                PREVIOUS_RATE_WEIGHT * prev_down + (1.0 - PREVIOUS_RATE_WEIGHT) * down,
                PREVIOUS_RATE_WEIGHT * prev_up + (1.0 - PREVIOUS_RATE_WEIGHT) * up,
            ),
            None => (down, up),
        };
        self.rates = Some(blended);
        Some(blended)
    }
}
