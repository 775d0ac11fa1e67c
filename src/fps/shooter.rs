//! Refresh-anchored mapping for the fast-shooter profile.

use super::{gaming_load, EstimateContext, FpsCandidate, FpsEstimator};
use crate::error::EstimateError;

pub const SHOOTER_WEIGHT: f64 = 0.9;

/// Competitive shooters usually render above the refresh rate until the
/// GPU saturates.
pub fn refresh_multiplier(load: f64) -> f64 {
    match load {
        l if l < 40.0 => 1.5,
        l if l < 60.0 => 1.35,
        l if l < 80.0 => 1.15,
        l if l < 95.0 => 1.0,
        _ => 0.85,
    }
}

pub struct ShooterEstimator;

impl FpsEstimator for ShooterEstimator {
    fn name(&self) -> &'static str {
        "shooter-mapping"
    }

    fn weight(&self) -> f64 {
        SHOOTER_WEIGHT
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError> {
        let load = gaming_load(ctx)?;
        if !(ctx.refresh_hz.is_finite() && ctx.refresh_hz > 0.0) {
            return Err(EstimateError::Unavailable("display refresh rate"));
        }
        FpsCandidate::new(
            ctx.refresh_hz * refresh_multiplier(load),
            SHOOTER_WEIGHT,
            false,
            self.name(),
        )
    }
}
