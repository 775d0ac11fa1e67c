//! GameSense: foreground game detection and multi-source FPS estimation
//! for desktop telemetry overlays.
//!
//! A single [`sampler::Sampler`] owns every platform provider, polls them at
//! per-metric cadences, classifies the foreground, fuses FPS candidates and
//! publishes a [`telemetry::MonitorEvent`] on a watch channel.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fps;
pub mod inspector;
pub mod logging;
pub mod platform;
pub mod registry;
pub mod sampler;
pub mod telemetry;

pub use config::{ConfigManager, Settings};
pub use error::MonitorError;
pub use platform::Platform;
pub use sampler::{Sampler, SamplerHandle};
pub use telemetry::MonitorEvent;
