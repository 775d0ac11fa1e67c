//! FPS estimates inferred from GPU load, temperature, and memory pressure.
//!
//! None of these see frames; they map telemetry onto an expected frame
//! rate and only run while a game is in the foreground.

use super::{gaming_load, EstimateContext, FpsCandidate, FpsEstimator};
use crate::error::EstimateError;

pub const VENDOR_HEURISTIC_WEIGHT: f64 = 0.85;
pub const DIRECT_VENDOR_WEIGHT: f64 = 0.75;
pub const REGRESSION_WEIGHT: f64 = 0.55;

/// Theoretical max FPS by model-name substring; first match wins.
const GPU_TIERS: &[(&str, f64)] = &[
    ("rtx 4090", 360.0),
    ("rtx 4080", 300.0),
    ("rtx 40", 240.0),
    ("rtx 30", 200.0),
    ("rtx 20", 160.0),
    ("gtx 16", 120.0),
    ("gtx 10", 100.0),
    ("rx 7900", 300.0),
    ("rx 7", 220.0),
    ("rx 6", 180.0),
    ("rx 5", 120.0),
    ("arc", 140.0),
    ("intel", 60.0),
];
const DEFAULT_TIER_FPS: f64 = 144.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Nvidia,
    Amd,
    Other,
}

impl Vendor {
    pub fn from_name(name: Option<&str>) -> Self {
        let Some(name) = name.map(str::to_lowercase) else {
            return Vendor::Other;
        };
        if ["nvidia", "geforce", "rtx", "gtx", "quadro"]
            .iter()
            .any(|k| name.contains(k))
        {
            Vendor::Nvidia
        } else if ["amd", "radeon", "rx "].iter().any(|k| name.contains(k)) {
            Vendor::Amd
        } else {
            Vendor::Other
        }
    }
}

pub fn tier_max_fps(gpu_name: Option<&str>) -> f64 {
    let Some(name) = gpu_name.map(str::to_lowercase) else {
        return DEFAULT_TIER_FPS;
    };
    GPU_TIERS
        .iter()
        .find(|(key, _)| name.contains(key))
        .map_or(DEFAULT_TIER_FPS, |(_, fps)| *fps)
}

/// Penalty for thermal throttling, in (0, 1].
pub fn thermal_factor(temp: Option<f64>) -> f64 {
    match temp {
        Some(t) if t > 95.0 => 0.70,
        Some(t) if t > 90.0 => 0.80,
        Some(t) if t > 85.0 => 0.88,
        Some(t) if t > 80.0 => 0.94,
        Some(t) if t > 75.0 => 0.97,
        _ => 1.0,
    }
}

/// Penalty for memory pressure, in (0, 1]. Takes utilization in percent.
pub fn memory_factor(memory: Option<f64>) -> f64 {
    match memory {
        Some(m) if m > 95.0 => 0.80,
        Some(m) if m > 85.0 => 0.90,
        Some(m) if m > 70.0 => 0.96,
        _ => 1.0,
    }
}

/// Diminishing returns once the GPU is saturated: linear from 1.0 at 90%
/// load down to 0.85 at 100%.
pub fn saturation_factor(load: f64) -> f64 {
    if load > 90.0 {
        1.0 - ((load.min(100.0) - 90.0) / 10.0) * 0.15
    } else {
        1.0
    }
}

/// Tier-scaled estimate with thermal, memory, and saturation corrections.
pub struct VendorHeuristicEstimator;

impl FpsEstimator for VendorHeuristicEstimator {
    fn name(&self) -> &'static str {
        "vendor-heuristic"
    }

    fn weight(&self) -> f64 {
        VENDOR_HEURISTIC_WEIGHT
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError> {
        let load = gaming_load(ctx)?;
        let t = ctx.telemetry;
        let utilization = (load / 100.0).clamp(0.0, 1.0);

        let fps = tier_max_fps(t.gpu_name.as_deref())
            * (1.0 - 0.6 * utilization)
            * thermal_factor(t.gpu_temp)
            * memory_factor(t.gpu_mem_percent())
            * saturation_factor(load);

        FpsCandidate::new(fps, VENDOR_HEURISTIC_WEIGHT, false, self.name())
    }
}

/// (load %, fps) breakpoints per vendor.
const NVIDIA_CURVE: &[(f64, f64)] = &[(0.0, 240.0), (30.0, 165.0), (60.0, 120.0), (85.0, 75.0), (100.0, 50.0)];
const AMD_CURVE: &[(f64, f64)] = &[(0.0, 200.0), (30.0, 144.0), (60.0, 100.0), (85.0, 65.0), (100.0, 45.0)];
const OTHER_CURVE: &[(f64, f64)] = &[(0.0, 120.0), (30.0, 90.0), (60.0, 60.0), (85.0, 40.0), (100.0, 30.0)];

/// Load-to-FPS curve for the GPU's vendor.
pub fn vendor_curve(gpu_name: Option<&str>) -> &'static [(f64, f64)] {
    match Vendor::from_name(gpu_name) {
        Vendor::Nvidia => NVIDIA_CURVE,
        Vendor::Amd => AMD_CURVE,
        Vendor::Other => OTHER_CURVE,
    }
}

pub fn piecewise(curve: &[(f64, f64)], x: f64) -> f64 {
    let Some(&(first_x, first_y)) = curve.first() else {
        return 0.0;
    };
    if x <= first_x {
        return first_y;
    }
    for pair in curve.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    curve.last().map_or(0.0, |&(_, y)| y)
}

/// Vendor-conditional load-to-FPS curve with a memory discount.
pub struct DirectVendorEstimator;

impl FpsEstimator for DirectVendorEstimator {
    fn name(&self) -> &'static str {
        "direct-vendor"
    }

    fn weight(&self) -> f64 {
        DIRECT_VENDOR_WEIGHT
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError> {
        let load = gaming_load(ctx)?;
        let curve = vendor_curve(ctx.telemetry.gpu_name.as_deref());

        let discount = match ctx.telemetry.gpu_mem_percent() {
            Some(m) if m > 85.0 => 0.85,
            Some(m) if m > 70.0 => 0.93,
            _ => 1.0,
        };

        let fps = piecewise(curve, load.clamp(0.0, 100.0)) * discount;
        FpsCandidate::new(fps, DIRECT_VENDOR_WEIGHT, false, self.name())
    }
}

/// Temperature mapped onto [0, 1] between 30 and 100 C.
fn normalized_temp(temp: Option<f64>) -> f64 {
    temp.map_or(0.0, |t| ((t - 30.0) / 70.0).clamp(0.0, 1.0))
}

/// Composite load index in [0, 1]. Throttling and memory pressure make the
/// same load mean more work, so each term is divided by its factor.
pub fn performance_index(load: f64, memory: Option<f64>, temp: Option<f64>) -> f64 {
    let load_term = (load / 100.0).clamp(0.0, 1.0) / thermal_factor(temp);
    let memory_term = memory.map_or(0.0, |m| (m / 100.0).clamp(0.0, 1.0)) / memory_factor(memory);
    let temp_term = normalized_temp(temp);
    (0.7 * load_term + 0.2 * memory_term + 0.1 * temp_term).clamp(0.0, 1.0)
}

pub fn regression_bucket(index: f64) -> f64 {
    match index {
        i if i >= 0.9 => 45.0,
        i if i >= 0.75 => 60.0,
        i if i >= 0.6 => 75.0,
        i if i >= 0.45 => 90.0,
        i if i >= 0.3 => 110.0,
        _ => 144.0,
    }
}

/// Coarse step mapping from the composite index. Lowest confidence.
pub struct RegressionEstimator;

impl FpsEstimator for RegressionEstimator {
    fn name(&self) -> &'static str {
        "regression"
    }

    fn weight(&self) -> f64 {
        REGRESSION_WEIGHT
    }

    fn estimate(&mut self, ctx: &EstimateContext<'_>) -> Result<FpsCandidate, EstimateError> {
        let load = gaming_load(ctx)?;
        let t = ctx.telemetry;
        let index = performance_index(load, t.gpu_mem_percent(), t.gpu_temp);
        FpsCandidate::new(regression_bucket(index), REGRESSION_WEIGHT, false, self.name())
    }
}
