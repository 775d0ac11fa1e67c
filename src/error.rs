//! Error types for the GameSense monitor.
//!
//! This module defines custom error enums for each component of the monitor.
//! Only `MonitorError` ever crosses the public start-up boundary; everything
//! else is absorbed by the component that produced it and degrades to
//! "no value for this tick".

use thiserror::Error;

/// Errors related to the shared-memory frame publisher.
#[derive(Error, Debug)]
pub enum ShmError {
    #[error("Failed to open shared memory segment '{name}': {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map shared memory: {0}")]
    MmapFailed(std::io::Error),

    #[error("Invalid data read from shared memory: {0}")]
    InvalidData(String),

    #[error("Shared memory segment not available, no frame publisher is running")]
    NotAvailable,
}

/// Why a single FPS estimator produced no candidate this cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("Transient read failure: {0}")]
    Transient(String),

    #[error("Estimate {0:.1} fps is outside the valid range")]
    OutOfRange(f64),

    #[error("Estimation time budget exhausted")]
    BudgetExhausted,

    #[error("Estimator only runs while a game is in the foreground")]
    NotGaming,
}

impl From<ShmError> for EstimateError {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::NotAvailable => EstimateError::Unavailable("shared memory frame publisher"),
            other => EstimateError::Transient(other.to_string()),
        }
    }
}

/// Errors raised by platform telemetry providers.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("{0} provider is not available on this system")]
    Unavailable(&'static str),

    #[error("{provider} query failed: {message}")]
    QueryFailed {
        provider: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at '{0}'")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Top-level monitor errors. Only surfaced while starting up.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Failed to start sampling loop: {0}")]
    Startup(String),

    #[error("Sampling loop did not stop cleanly: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_not_available_maps_to_unavailable() {
        let err: EstimateError = ShmError::NotAvailable.into();
        assert!(matches!(err, EstimateError::Unavailable(_)));
    }

    #[test]
    fn test_shm_invalid_data_maps_to_transient() {
        let err: EstimateError = ShmError::InvalidData("bad signature".to_string()).into();
        match err {
            EstimateError::Transient(msg) => assert!(msg.contains("bad signature")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_monitor_error_wraps_config() {
        let err: MonitorError = ConfigError::ValidationError("tick".to_string()).into();
        assert!(err.to_string().contains("Configuration error"));
    }
}
