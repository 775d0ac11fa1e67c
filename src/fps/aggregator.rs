//! Time-boxed fusion of FPS candidates.
//!
//! Estimators run in descending confidence order until the budget is spent
//! or an authoritative value arrives. Authoritative values are returned
//! as-is; everything else is trimmed, weighted, calibrated, and capped at a
//! multiple of the display refresh rate.

use super::estimators::{EngineCounterEstimator, SharedMemoryEstimator};
use super::heuristics::{DirectVendorEstimator, RegressionEstimator, VendorHeuristicEstimator};
use super::shooter::ShooterEstimator;
use super::{EstimateContext, FpsCandidate, FpsEstimator, Profile};
use crate::config::{seconds, FusionTunables};
use crate::inspector::FALLBACK_REFRESH_HZ;
use crate::platform::{EngineCounterSource, FrameSource};
use crate::registry::CalibrationTable;
use std::time::Duration;
use tracing::debug;

/// Result of one fusion cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEstimate {
    /// Fused frame rate; 0 means no estimate.
    pub raw: f64,
    pub authoritative: bool,
    pub profile: Profile,
    /// Estimators that contributed.
    pub sources: Vec<&'static str>,
}

impl FusedEstimate {
    pub fn none(profile: Profile) -> Self {
        Self {
            raw: 0.0,
            authoritative: false,
            profile,
            sources: Vec::new(),
        }
    }
}

/// GPU-load scaling of the refresh rate used when every estimator failed.
pub fn fallback_multiplier(load: f64) -> f64 {
    match load {
        l if l >= 90.0 => 0.75,
        l if l >= 70.0 => 0.9,
        l if l >= 40.0 => 1.0,
        _ => 1.2,
    }
}

/// Drop the lowest and highest value when more than three candidates exist,
/// then take the confidence-weighted mean.
pub fn trimmed_weighted_mean(candidates: &[FpsCandidate]) -> Option<f64> {
    let mut sorted: Vec<&FpsCandidate> = candidates.iter().collect();
    if sorted.len() > 3 {
        sorted.sort_by(|a, b| a.value.total_cmp(&b.value));
        sorted.remove(0);
        sorted.pop();
    }

    let total_weight: f64 = sorted.iter().map(|c| c.weight).sum();
    if sorted.is_empty() || total_weight <= 0.0 {
        return None;
    }
    Some(sorted.iter().map(|c| c.value * c.weight).sum::<f64>() / total_weight)
}

pub struct Aggregator {
    estimators: Vec<Box<dyn FpsEstimator>>,
    shooter: Box<dyn FpsEstimator>,
    calibration: CalibrationTable,
    tunables: FusionTunables,
}

impl Aggregator {
    pub fn new(
        mut estimators: Vec<Box<dyn FpsEstimator>>,
        shooter: Box<dyn FpsEstimator>,
        calibration: CalibrationTable,
        tunables: FusionTunables,
    ) -> Self {
        // Authoritative sources first, then by confidence.
        estimators.sort_by(|a, b| {
            b.is_authoritative()
                .cmp(&a.is_authoritative())
                .then(b.weight().total_cmp(&a.weight()))
        });
        Self {
            estimators,
            shooter,
            calibration,
            tunables,
        }
    }

    /// The full estimator chain over the given measured sources.
    pub fn standard(
        frames: Box<dyn FrameSource>,
        counters: Box<dyn EngineCounterSource>,
        tunables: FusionTunables,
    ) -> Self {
        let counter_interval = seconds(tunables.counter_interval);
        Self::new(
            vec![
                Box::new(SharedMemoryEstimator::new(frames)),
                Box::new(EngineCounterEstimator::new(counters, counter_interval)),
                Box::new(VendorHeuristicEstimator),
                Box::new(DirectVendorEstimator),
                Box::new(RegressionEstimator),
            ],
            Box::new(ShooterEstimator),
            CalibrationTable::default(),
            tunables,
        )
    }

    pub fn budget(&self) -> Duration {
        self.tunables.budget()
    }

    /// Fuse one cycle's candidates. `ctx.deadline` bounds the whole call.
    pub fn fuse(&mut self, ctx: &EstimateContext<'_>, profile: Profile) -> FusedEstimate {
        let mut candidates = Vec::new();
        let skip_authoritative = profile == Profile::FastShooter;

        if skip_authoritative {
            for estimator in self.estimators.iter_mut().filter(|e| e.is_authoritative()) {
                if let Some(candidate) = run(estimator.as_mut(), ctx) {
                    if candidate.authoritative {
                        return authoritative(candidate, profile);
                    }
                    candidates.push(candidate);
                }
            }

            match self.shooter.estimate(ctx) {
                Ok(candidate) => return self.finish(vec![candidate], ctx, profile),
                Err(e) => debug!("Shooter mapping unusable, using general estimators: {}", e),
            }
        }

        for estimator in self.estimators.iter_mut() {
            if skip_authoritative && estimator.is_authoritative() {
                continue;
            }
            if let Some(candidate) = run(estimator.as_mut(), ctx) {
                if candidate.authoritative {
                    return authoritative(candidate, profile);
                }
                candidates.push(candidate);
            }
        }

        self.finish(candidates, ctx, profile)
    }

    fn finish(&self, candidates: Vec<FpsCandidate>, ctx: &EstimateContext<'_>, profile: Profile) -> FusedEstimate {
        let refresh = if ctx.refresh_hz.is_finite() && ctx.refresh_hz > 0.0 {
            ctx.refresh_hz
        } else {
            FALLBACK_REFRESH_HZ
        };
        let cap = refresh * self.tunables.refresh_cap;

        let Some(mean) = trimmed_weighted_mean(&candidates) else {
            return match ctx.telemetry.gpu_load {
                Some(load) if ctx.is_gaming => FusedEstimate {
                    raw: (refresh * fallback_multiplier(load)).min(cap),
                    authoritative: false,
                    profile,
                    sources: vec!["refresh-fallback"],
                },
                _ => FusedEstimate::none(profile),
            };
        };

        let offset = self
            .calibration
            .offset_for(ctx.foreground.process_name.as_deref());
        FusedEstimate {
            raw: (mean + offset).clamp(0.0, cap),
            authoritative: false,
            profile,
            sources: candidates.iter().map(|c| c.source).collect(),
        }
    }
}

fn run(estimator: &mut dyn FpsEstimator, ctx: &EstimateContext<'_>) -> Option<FpsCandidate> {
    if ctx.budget_left().is_zero() {
        debug!("FPS budget exhausted before {}", estimator.name());
        return None;
    }
    match estimator.estimate(ctx) {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            debug!("{} produced no candidate: {}", estimator.name(), e);
            None
        }
    }
}

fn authoritative(candidate: FpsCandidate, profile: Profile) -> FusedEstimate {
    FusedEstimate {
        raw: candidate.value,
        authoritative: true,
        profile,
        sources: vec![candidate.source],
    }
}
