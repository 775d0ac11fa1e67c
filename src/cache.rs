//! Telemetry cache with per-metric cadence and staleness.
//!
//! Every metric keeps its last-known-good value. A failed or implausible
//! reading leaves the previous value untouched, so a snapshot never mixes
//! a fresh field with garbage.

use crate::platform::GpuReading;
use crate::telemetry::TelemetrySnapshot;
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum-interval gate for one polled metric.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    interval: Duration,
    last: Option<Instant>,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn from_secs(secs: f64) -> Self {
        Self::new(crate::config::seconds(secs))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// True if the metric has never run or its interval has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Check and mark in one step.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }
}

/// A value with the time it was last refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    value: Option<T>,
    updated: Option<Instant>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            value: None,
            updated: None,
        }
    }
}

impl<T> Cached<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: T, now: Instant) {
        self.value = Some(value);
        self.updated = Some(now);
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.updated.map(|t| now.saturating_duration_since(t))
    }

    pub fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now).map_or(false, |age| age <= max_age)
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.updated = None;
    }
}

impl<T: Copy> Cached<T> {
    pub fn value(&self) -> Option<T> {
        self.value
    }
}

fn valid_percent(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

/// Last-known-good store for every telemetry field.
#[derive(Debug, Default)]
pub struct TelemetryCache {
    cpu_usage: Cached<f64>,
    gpu_load: Cached<f64>,
    gpu_temp: Cached<f64>,
    gpu_mem_util: Cached<f64>,
    gpu_name: Option<String>,
    network: Cached<(f64, f64)>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a CPU reading. Returns false and keeps the old value if invalid.
    pub fn record_cpu(&mut self, usage: f64, now: Instant) -> bool {
        if !valid_percent(usage) {
            return false;
        }
        self.cpu_usage.update(usage, now);
        true
    }

    /// Store a GPU reading as a unit; an implausible reading is rejected whole.
    /// Optional sensors that are absent keep their previous values.
    pub fn record_gpu(&mut self, reading: &GpuReading, now: Instant) -> bool {
        if !reading.is_plausible() {
            return false;
        }
        self.gpu_load.update(reading.load, now);
        if let Some(temp) = reading.temperature {
            self.gpu_temp.update(temp, now);
        }
        if let Some(mem) = reading.memory_utilization {
            self.gpu_mem_util.update(mem, now);
        }
        if reading.name.is_some() {
            self.gpu_name = reading.name.clone();
        }
        true
    }

    /// Store network throughput in bytes per second.
    pub fn record_network(&mut self, down: f64, up: f64, now: Instant) -> bool {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(down) || !valid(up) {
            return false;
        }
        self.network.update((down, up), now);
        true
    }

    /// Drop values whose provider has stopped answering. GPU fields older
    /// than `gpu_max_age` and network rates older than `network_max_age`
    /// read as missing from then on.
    pub fn expire(&mut self, now: Instant, gpu_max_age: Duration, network_max_age: Duration) {
        for (name, field) in [
            ("gpu_load", &mut self.gpu_load),
            ("gpu_temp", &mut self.gpu_temp),
            ("gpu_mem_util", &mut self.gpu_mem_util),
        ] {
            if field.get().is_some() && !field.is_fresh(now, gpu_max_age) {
                debug!(field = name, "Dropping stale GPU value");
                field.clear();
            }
        }

        if self.network.get().is_some() && !self.network.is_fresh(now, network_max_age) {
            debug!("Dropping stale network rates");
            self.network.clear();
        }
    }

    /// Copy every field into an immutable snapshot.
    pub fn snapshot(&self, now: Instant) -> TelemetrySnapshot {
        let (net_down, net_up) = self.network.value().unwrap_or((0.0, 0.0));
        TelemetrySnapshot {
            cpu_usage: self.cpu_usage.value().unwrap_or(0.0),
            gpu_load: self.gpu_load.value(),
            gpu_temp: self.gpu_temp.value(),
            gpu_mem_util: self.gpu_mem_util.value(),
            gpu_name: self.gpu_name.clone(),
            net_down,
            net_up,
            timestamp: now,
        }
    }
}
