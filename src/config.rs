//! Configuration module for persistent settings.
//!
//! This module handles loading, saving, and validating monitor settings.
//! The sampling core only ever reads a cloned `Settings` value; edits go
//! through `ConfigManager::update` and take effect on the next cycle.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Upper bound for every configured interval, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 3600.0;

/// Seconds to a Duration. Negative and NaN map to zero, anything too large
/// for a Duration saturates.
pub fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= MAX_INTERVAL_SECS {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} ({}) must be a finite interval in (0, {}] seconds",
            name, value, MAX_INTERVAL_SECS
        )))
    }
}

/// Monitor settings supplied by the configuration collaborator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub show_fps: bool,
    pub fps_only_in_game: bool,
    /// Demand stronger GPU evidence before treating an ambiguous fullscreen
    /// application as a game.
    pub strict_non_game_fullscreen: bool,
    /// Sampling loop tick, in seconds.
    pub performance_sleep_interval: f64,
    /// Snapshot publish cadence, in seconds.
    pub signal_interval: f64,
    pub custom_non_game_processes: BTreeSet<String>,
    pub custom_non_game_titles: BTreeSet<String>,
    pub cadences: Cadences,
    pub classifier: ClassifierThresholds,
    pub fusion: FusionTunables,
    pub smoothing: SmoothingTunables,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_fps: true,
            fps_only_in_game: true,
            strict_non_game_fullscreen: true,
            performance_sleep_interval: 0.05,
            signal_interval: 0.1,
            custom_non_game_processes: BTreeSet::new(),
            custom_non_game_titles: BTreeSet::new(),
            cadences: Cadences::default(),
            classifier: ClassifierThresholds::default(),
            fusion: FusionTunables::default(),
            smoothing: SmoothingTunables::default(),
        }
    }
}

/// Minimum interval between polls of each metric, in seconds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Cadences {
    pub gpu: f64,
    pub network: f64,
    pub classify: f64,
    pub fps_gaming: f64,
    pub fps_idle: f64,
    pub foreground: f64,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            gpu: 0.6,
            network: 0.5,
            classify: 1.0,
            fps_gaming: 0.5,
            fps_idle: 2.0,
            foreground: 0.3,
        }
    }
}

/// Empirically tuned classifier thresholds. GPU load and memory values are
/// percentages; hold times are seconds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub gaming_load: f64,
    pub fullscreen_load: f64,
    pub suspect_load: f64,
    pub suspect_memory: f64,
    pub suspect_load_without_memory: f64,
    pub heuristic_load: f64,
    pub heuristic_memory: f64,
    pub suspect_heuristic_load: f64,
    pub suspect_heuristic_memory: f64,
    pub process_cpu: f64,
    pub game_process_load: f64,
    pub launcher_load: f64,
    pub launcher_memory: f64,
    pub launcher_load_without_memory: f64,
    pub fullscreen_tolerance: f64,
    pub positive_hold: f64,
    pub negative_hold: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            gaming_load: 35.0,
            fullscreen_load: 25.0,
            suspect_load: 60.0,
            suspect_memory: 70.0,
            suspect_load_without_memory: 70.0,
            heuristic_load: 45.0,
            heuristic_memory: 50.0,
            suspect_heuristic_load: 70.0,
            suspect_heuristic_memory: 75.0,
            process_cpu: 1.5,
            game_process_load: 10.0,
            launcher_load: 50.0,
            launcher_memory: 60.0,
            launcher_load_without_memory: 60.0,
            fullscreen_tolerance: 0.02,
            positive_hold: 0.5,
            negative_hold: 0.2,
        }
    }
}

impl ClassifierThresholds {
    pub fn positive_hold(&self) -> Duration {
        seconds(self.positive_hold)
    }

    pub fn negative_hold(&self) -> Duration {
        seconds(self.negative_hold)
    }
}

/// Fusion aggregator tunables.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FusionTunables {
    /// Total time budget across all estimator invocations, in seconds.
    pub budget: f64,
    /// Fused values are capped at this multiple of the display refresh rate.
    pub refresh_cap: f64,
    /// Interval between the two engine-counter samples, in seconds.
    pub counter_interval: f64,
}

impl Default for FusionTunables {
    fn default() -> Self {
        Self {
            budget: 0.25,
            refresh_cap: 1.5,
            counter_interval: 0.1,
        }
    }
}

impl FusionTunables {
    pub fn budget(&self) -> Duration {
        seconds(self.budget)
    }
}

/// Smoothing and outlier filter tunables.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SmoothingTunables {
    pub history_len: usize,
    pub fast_history_len: usize,
    pub outlier_ratio: f64,
    pub window_ratio: f64,
    pub outlier_pull: f64,
    pub rate_floor: f64,
    pub rate_fraction: f64,
    pub fast_rate_fraction: f64,
    pub rising_scale: f64,
    pub falling_scale: f64,
    pub authoritative_previous_weight: f64,
}

impl Default for SmoothingTunables {
    fn default() -> Self {
        Self {
            history_len: 8,
            fast_history_len: 3,
            outlier_ratio: 0.6,
            window_ratio: 0.7,
            outlier_pull: 0.6,
            rate_floor: 10.0,
            rate_fraction: 0.2,
            fast_rate_fraction: 0.3,
            rising_scale: 1.15,
            falling_scale: 1.25,
            authoritative_previous_weight: 0.2,
        }
    }
}

impl Settings {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.performance_sleep_interval > 0.0 && self.performance_sleep_interval <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "performance_sleep_interval ({}) must be in (0, 1] seconds",
                self.performance_sleep_interval
            )));
        }

        let c = &self.cadences;
        for (name, value) in [
            ("signal_interval", self.signal_interval),
            ("cadences.gpu", c.gpu),
            ("cadences.network", c.network),
            ("cadences.classify", c.classify),
            ("cadences.fps_gaming", c.fps_gaming),
            ("cadences.fps_idle", c.fps_idle),
            ("cadences.foreground", c.foreground),
            ("classifier.positive_hold", self.classifier.positive_hold),
            ("classifier.negative_hold", self.classifier.negative_hold),
            ("fusion.budget", self.fusion.budget),
            ("fusion.counter_interval", self.fusion.counter_interval),
        ] {
            check_interval(name, value)?;
        }

        let t = &self.classifier;
        for (name, value) in [
            ("classifier.gaming_load", t.gaming_load),
            ("classifier.fullscreen_load", t.fullscreen_load),
            ("classifier.suspect_load", t.suspect_load),
            ("classifier.suspect_memory", t.suspect_memory),
            ("classifier.suspect_load_without_memory", t.suspect_load_without_memory),
            ("classifier.heuristic_load", t.heuristic_load),
            ("classifier.heuristic_memory", t.heuristic_memory),
            ("classifier.suspect_heuristic_load", t.suspect_heuristic_load),
            ("classifier.suspect_heuristic_memory", t.suspect_heuristic_memory),
            ("classifier.game_process_load", t.game_process_load),
            ("classifier.launcher_load", t.launcher_load),
            ("classifier.launcher_memory", t.launcher_memory),
            ("classifier.launcher_load_without_memory", t.launcher_load_without_memory),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} ({}) must be a percentage in [0, 100]",
                    name, value
                )));
            }
        }

        if t.positive_hold < t.negative_hold {
            return Err(ConfigError::ValidationError(format!(
                "classifier.positive_hold ({}) cannot be shorter than negative_hold ({})",
                t.positive_hold, t.negative_hold
            )));
        }

        if !(self.fusion.refresh_cap >= 1.0 && self.fusion.refresh_cap.is_finite()) {
            return Err(ConfigError::ValidationError(format!(
                "fusion.refresh_cap ({}) must be finite and at least 1.0",
                self.fusion.refresh_cap
            )));
        }

        let s = &self.smoothing;
        if s.fast_history_len < 1 || s.history_len < s.fast_history_len || s.history_len > 12 {
            return Err(ConfigError::ValidationError(format!(
                "smoothing history lengths ({} fast, {} general) must satisfy 1 <= fast <= general <= 12",
                s.fast_history_len, s.history_len
            )));
        }

        Ok(())
    }

    /// Sampling loop tick as a Duration.
    pub fn tick(&self) -> Duration {
        seconds(self.performance_sleep_interval)
    }

    /// Publish cadence as a Duration.
    pub fn publish_interval(&self) -> Duration {
        seconds(self.signal_interval)
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    settings: RwLock<Settings>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from an existing file.
    /// Fails with `FileNotFound` when the file is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(format!("Failed to read config file: {}", e)))?;

        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

        settings.validate()?;

        Ok(Self {
            settings: RwLock::new(settings),
            path: path.to_path_buf(),
        })
    }

    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default settings.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(_)) => Ok(Self {
                settings: RwLock::new(Settings::default()),
                path: path.to_path_buf(),
            }),
            other => other,
        }
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let settings = self.settings.read().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire read lock".to_string())
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&*settings)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current settings.
    pub fn get(&self) -> Settings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| Settings::default())
    }

    /// Update settings with validation and persist them.
    pub fn update(&self, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;

        let mut current = self.settings.write().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire write lock".to_string())
        })?;

        *current = settings;
        drop(current);

        self.save()
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default config path (<config dir>/game-sense/config.json).
    pub fn default_path() -> PathBuf {
        config_dir().join("config.json")
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("game-sense")
}
