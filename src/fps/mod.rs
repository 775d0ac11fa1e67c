//! FPS estimation: candidate estimators, fusion, and smoothing.

pub mod aggregator;
pub mod estimators;
pub mod heuristics;
pub mod shooter;
pub mod smoothing;

use crate::error::EstimateError;
use crate::inspector::ForegroundContext;
use crate::telemetry::TelemetrySnapshot;
use std::time::{Duration, Instant};

pub use aggregator::{Aggregator, FusedEstimate};
pub use smoothing::{FpsEstimateState, Smoother};

/// Lowest frame rate any estimator may report.
pub const MIN_FPS: f64 = 1.0;
/// Highest frame rate any estimator may report.
pub const MAX_FPS: f64 = 400.0;

pub fn in_valid_range(fps: f64) -> bool {
    fps.is_finite() && (MIN_FPS..=MAX_FPS).contains(&fps)
}

/// One estimator's output for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsCandidate {
    pub value: f64,
    /// Static trust in (0, 1].
    pub weight: f64,
    /// Ground truth; bypasses blending and the refresh cap.
    pub authoritative: bool,
    pub source: &'static str,
}

impl FpsCandidate {
    /// Rejects values outside [1, 400] fps.
    pub fn new(
        value: f64,
        weight: f64,
        authoritative: bool,
        source: &'static str,
    ) -> Result<Self, EstimateError> {
        if !in_valid_range(value) {
            return Err(EstimateError::OutOfRange(value));
        }
        Ok(Self {
            value,
            weight: weight.clamp(f64::MIN_POSITIVE, 1.0),
            authoritative,
            source,
        })
    }
}

/// Smoothing and estimator selection profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    General,
    /// Fast-paced shooter: refresh-anchored mapping, short history.
    FastShooter,
}

/// Inputs shared by every estimator in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct EstimateContext<'a> {
    pub foreground: &'a ForegroundContext,
    pub telemetry: &'a TelemetrySnapshot,
    pub refresh_hz: f64,
    pub is_gaming: bool,
    /// End of this cycle's time budget.
    pub deadline: Instant,
}

impl EstimateContext<'_> {
    /// Time left before the deadline; zero once it has passed.
    pub fn budget_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A single FPS source.
pub trait FpsEstimator: Send {
    fn name(&self) -> &'static str;

    /// Static confidence weight; estimators run in descending order.
    fn weight(&self) -> f64;

    /// Whether this source can produce an authoritative value.
    fn is_authoritative(&self) -> bool {
        false
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError>;
}

/// Gate for estimators that infer FPS from GPU load: they only run while
/// gaming and need a measured load.
pub(crate) fn gaming_load(ctx: &EstimateContext<'_>) -> Result<f64, EstimateError> {
    if !ctx.is_gaming {
        return Err(EstimateError::NotGaming);
    }
    ctx.telemetry
        .gpu_load
        .ok_or(EstimateError::Unavailable("GPU load"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_range() {
        assert!(FpsCandidate::new(60.0, 1.0, false, "t").is_ok());
        assert!(FpsCandidate::new(1.0, 1.0, false, "t").is_ok());
        assert!(FpsCandidate::new(400.0, 1.0, false, "t").is_ok());
        assert_eq!(
            FpsCandidate::new(0.5, 1.0, false, "t"),
            Err(EstimateError::OutOfRange(0.5))
        );
        assert!(FpsCandidate::new(401.0, 1.0, false, "t").is_err());
        assert!(FpsCandidate::new(f64::NAN, 1.0, false, "t").is_err());
    }
}
