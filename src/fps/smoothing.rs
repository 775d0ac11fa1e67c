//! Temporal smoothing and outlier filtering of the fused FPS.

use super::{FusedEstimate, Profile};
use crate::config::SmoothingTunables;
use std::collections::VecDeque;

/// Recency weights for the fast-shooter window, oldest first.
const FAST_WEIGHTS: [f64; 3] = [0.15, 0.30, 0.55];
/// Exponent for the general profile's recency weighting.
const RECENCY_EXPONENT: f64 = 1.3;
/// Samples in the "recent" average used for outlier detection.
const RECENT_WINDOW: usize = 3;

/// Published view of the smoother.
#[derive(Debug, Clone, PartialEq)]
pub struct FpsEstimateState {
    pub raw_fused: f64,
    pub smoothed: f64,
    pub history: Vec<f64>,
    pub last_source_authoritative: bool,
}

pub struct Smoother {
    history: VecDeque<f64>,
    raw: f64,
    smoothed: f64,
    last_authoritative: bool,
    tunables: SmoothingTunables,
}

fn mean<'a>(values: impl Iterator<Item = &'a f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

fn relative_deviation(value: f64, reference: f64) -> f64 {
    if reference > 0.0 {
        (value - reference).abs() / reference
    } else {
        0.0
    }
}

impl Smoother {
    pub fn new(tunables: SmoothingTunables) -> Self {
        Self {
            history: VecDeque::with_capacity(tunables.history_len.max(1)),
            raw: 0.0,
            smoothed: 0.0,
            last_authoritative: false,
            tunables,
        }
    }

    pub fn smoothed(&self) -> f64 {
        self.smoothed
    }

    pub fn state(&self) -> FpsEstimateState {
        FpsEstimateState {
            raw_fused: self.raw,
            smoothed: self.smoothed,
            history: self.history.iter().copied().collect(),
            last_source_authoritative: self.last_authoritative,
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.smoothed = 0.0;
        self.raw = 0.0;
        self.last_authoritative = false;
    }

    pub fn smooth(&mut self, estimate: &FusedEstimate) -> f64 {
        self.smooth_raw(estimate.raw, estimate.authoritative, estimate.profile)
    }

    /// Fold one raw value into the displayed frame rate. Always returns a
    /// finite value >= 0; 0 means no estimate.
    pub fn smooth_raw(&mut self, raw: f64, authoritative: bool, profile: Profile) -> f64 {
        if !raw.is_finite() || raw <= 0.0 {
            self.reset();
            return 0.0;
        }

        let capacity = match profile {
            Profile::FastShooter => self.tunables.fast_history_len,
            Profile::General => self.tunables.history_len,
        }
        .max(1);

        self.raw = raw;
        self.last_authoritative = authoritative;
        let previous = self.smoothed;

        if authoritative {
            let w = self.tunables.authoritative_previous_weight;
            self.smoothed = if previous > 0.0 {
                w * previous + (1.0 - w) * raw
            } else {
                raw
            };
            self.push(raw, capacity);
            return self.smoothed;
        }

        let value = self.soften_outlier(raw);
        self.push(value, capacity);

        let average = match profile {
            Profile::FastShooter => self.fast_average(),
            Profile::General => self.recency_average(),
        };

        self.smoothed = if previous > 0.0 {
            let limit = self.rate_limit(previous, average > previous, profile);
            previous + (average - previous).clamp(-limit, limit)
        } else {
            average
        };
        self.smoothed = self.smoothed.max(0.0);
        self.smoothed
    }

    /// Largest change allowed in one cycle.
    pub fn rate_limit(&self, previous: f64, rising: bool, profile: Profile) -> f64 {
        let t = &self.tunables;
        match profile {
            // Symmetric, never more than the fast fraction of the previous value.
            Profile::FastShooter => t.rate_floor.max(t.fast_rate_fraction * previous),
            Profile::General => {
                let scale = if rising { t.rising_scale } else { t.falling_scale };
                t.rate_floor.max(t.rate_fraction * previous) * scale
            }
        }
    }

    /// Pull a value that disagrees with both the recent and the whole window
    /// part of the way toward the recent average. Never drops it.
    fn soften_outlier(&self, raw: f64) -> f64 {
        if self.history.len() < RECENT_WINDOW {
            return raw;
        }
        let recent = mean(self.history.iter().rev().take(RECENT_WINDOW)).unwrap_or(raw);
        let window = mean(self.history.iter()).unwrap_or(raw);

        let t = &self.tunables;
        if relative_deviation(raw, recent) > t.outlier_ratio && relative_deviation(raw, window) > t.window_ratio {
            raw + t.outlier_pull * (recent - raw)
        } else {
            raw
        }
    }

    fn push(&mut self, value: f64, capacity: usize) {
        self.history.push_back(value);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    /// Weight proportional to position^1.3, later samples heavier.
    fn recency_average(&self) -> f64 {
        let (sum, weights) = self
            .history
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(s, w), (i, v)| {
                let weight = ((i + 1) as f64).powf(RECENCY_EXPONENT);
                (s + v * weight, w + weight)
            });
        if weights > 0.0 {
            sum / weights
        } else {
            0.0
        }
    }

    /// Fixed steep weights aligned to the newest samples.
    fn fast_average(&self) -> f64 {
        let n = self.history.len().min(FAST_WEIGHTS.len());
        let weights = &FAST_WEIGHTS[FAST_WEIGHTS.len() - n..];
        let samples = self.history.iter().skip(self.history.len() - n);
        let (sum, total) = samples
            .zip(weights)
            .fold((0.0, 0.0), |(s, t), (v, w)| (s + v * w, t + w));
        if total > 0.0 {
            sum / total
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn smoother() -> Smoother {
        Smoother::new(SmoothingTunables::default())
    }

    #[test]
    fn test_first_value_passes_through() {
        let mut s = smoother();
        assert_eq!(s.smooth_raw(75.0, false, Profile::General), 75.0);
    }

    #[test]
    fn test_zero_clears_history() {
        let mut s = smoother();
        s.smooth_raw(75.0, false, Profile::General);
        s.smooth_raw(80.0, false, Profile::General);
        assert_eq!(s.smooth_raw(0.0, false, Profile::General), 0.0);
        assert!(s.state().history.is_empty());
        assert_eq!(s.smooth_raw(f64::NAN, false, Profile::General), 0.0);
    }

    #[test]
    fn test_authoritative_light_smoothing() {
        let mut s = smoother();
        s.smooth_raw(100.0, true, Profile::General);
        let v = s.smooth_raw(200.0, true, Profile::General);
        // 0.2 * 100 + 0.8 * 200
        assert!((v - 180.0).abs() < 1e-9);
        assert!(s.state().last_source_authoritative);
    }

    #[test]
    fn test_step_converges() {
        let mut s = smoother();
        for _ in 0..10 {
            s.smooth_raw(60.0, false, Profile::General);
        }

        // Recency-weighted window sliding from 60 to 90; the rate limit
        // never binds on this step.
        let expected = [
            67.520_885_881_084_95,
            73.843_249_470_733_14,
            79.017_514_160_758_86,
            83.099_890_342_360_15,
            86.154_319_132_176_68,
            88.255_723_579_104_11,
            89.496_207_131_118_08,
            90.0,
        ];
        for (cycle, want) in expected.iter().enumerate() {
            let value = s.smooth_raw(90.0, false, Profile::General);
            assert!((value - want).abs() < 1e-6, "cycle {}: {} != {}", cycle + 1, value, want);
        }
    }

    #[test]
    fn test_outlier_is_pulled_not_dropped() {
        let mut s = smoother();
        for _ in 0..8 {
            s.smooth_raw(60.0, false, Profile::General);
        }
        s.smooth_raw(200.0, false, Profile::General);
        let history = s.state().history;
        let last = *history.last().unwrap();
        // 200 + 0.6 * (60 - 200)
        assert!((last - 116.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_bounded_by_profile() {
        let mut s = smoother();
        for i in 0..20 {
            s.smooth_raw(60.0 + i as f64, false, Profile::General);
        }
        assert_eq!(s.state().history.len(), 8);

        s.smooth_raw(80.0, false, Profile::FastShooter);
        assert_eq!(s.state().history.len(), 3);
    }

    #[test]
    fn test_fast_profile_tracks_quickly() {
        let mut fast = smoother();
        let mut general = smoother();
        for _ in 0..8 {
            fast.smooth_raw(100.0, false, Profile::FastShooter);
            general.smooth_raw(100.0, false, Profile::General);
        }
        let f = fast.smooth_raw(140.0, false, Profile::FastShooter);
        let g = general.smooth_raw(140.0, false, Profile::General);
        assert!(f > g);
        // 0.15 * 100 + 0.30 * 100 + 0.55 * 140
        assert!((f - 122.0).abs() < 1e-9);
    }

    #[test]
    fn test_falling_limit_is_larger_than_rising() {
        let s = smoother();
        assert!(s.rate_limit(100.0, false, Profile::General) > s.rate_limit(100.0, true, Profile::General));
        assert!((s.rate_limit(30.0, true, Profile::General) - 11.5).abs() < 1e-9);
    }

    #[test]
    fn test_fast_limit_stays_within_fraction() {
        let s = smoother();
        assert!((s.rate_limit(100.0, false, Profile::FastShooter) - 30.0).abs() < 1e-9);
        assert!((s.rate_limit(100.0, true, Profile::FastShooter) - 30.0).abs() < 1e-9);
        // Floor still applies to low values.
        assert!((s.rate_limit(20.0, false, Profile::FastShooter) - 10.0).abs() < 1e-9);

        let mut fast = smoother();
        for _ in 0..3 {
            fast.smooth_raw(100.0, false, Profile::FastShooter);
        }
        for _ in 0..3 {
            fast.smooth_raw(10.0, false, Profile::FastShooter);
        }
        let mut previous = fast.smoothed();
        for raw in [300.0, 300.0, 20.0, 20.0] {
            let current = fast.smooth_raw(raw, false, Profile::FastShooter);
            assert!((current - previous).abs() <= 10.0f64.max(0.3 * previous) + 1e-9);
            previous = current;
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_rate_limited_general_profile(raws in prop::collection::vec(1.0f64..=400.0, 2..40)) {
            let mut s = smoother();
            let t = SmoothingTunables::default();
            let mut previous = s.smooth_raw(raws[0], false, Profile::General);
            for raw in &raws[1..] {
                let current = s.smooth_raw(*raw, false, Profile::General);
                let bound = t.rate_floor.max(t.rate_fraction * previous) * t.rising_scale.max(t.falling_scale);
                prop_assert!((current - previous).abs() <= bound + 1e-9);
                prop_assert!(current.is_finite() && current >= 0.0);
                previous = current;
            }
        }

        #[test]
        fn prop_constant_input_converges(start in 1.0f64..=400.0, target in 1.0f64..=400.0) {
            let mut s = smoother();
            for _ in 0..8 {
                s.smooth_raw(start, false, Profile::General);
            }
            let mut value = 0.0;
            for _ in 0..100 {
                value = s.smooth_raw(target, false, Profile::General);
            }
            prop_assert!((value - target).abs() < 1e-6);
        }
    }
}
