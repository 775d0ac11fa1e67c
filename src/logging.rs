//! Structured logging for the monitor daemon.
//!
//! JSON lines go to stderr and to a daily-rotated file under the user's
//! local data directory (`game-sense/game-sense.<date>.log`). The level
//! comes from `RUST_LOG`, defaulting to `info`.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const APP_DIR: &str = "game-sense";
const FILE_PREFIX: &str = "game-sense";
const MAX_LOG_FILES: usize = 3;
const DEFAULT_LEVEL: &str = "info";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine the local data directory")]
    NoDataDirectory,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the non-blocking writers flushing. Hold it until exit.
pub struct LogGuard {
    _file: WorkerGuard,
    _stderr: WorkerGuard,
}

/// Default log directory: `<local data dir>/game-sense`.
pub fn log_directory() -> Result<PathBuf, LoggingError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(LoggingError::NoDataDirectory)
}

/// JSON formatting layer shared by every sink.
fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
}

/// Install the global subscriber, logging to `directory` (or the default
/// directory) and stderr.
pub fn init_logging(directory: Option<&Path>) -> Result<LogGuard, LoggingError> {
    let dir = match directory {
        Some(dir) => dir.to_path_buf(),
        None => log_directory()?,
    };
    std::fs::create_dir_all(&dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: dir.display().to_string(),
        source: e,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(FILE_PREFIX)
        .filename_suffix("log")
        .build(&dir)
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer(file_writer))
        .with(json_layer(stderr_writer))
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard {
        _file: file_guard,
        _stderr: stderr_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Read;
    use std::sync::Mutex;

    /// One parsed JSON log line.
    #[derive(Debug, Clone, PartialEq)]
    struct LogRecord {
        timestamp: String,
        level: String,
        message: String,
        target: Option<String>,
        fields: serde_json::Map<String, serde_json::Value>,
    }

    impl LogRecord {
        /// RFC 3339 timestamp, a known level, and a non-empty message.
        fn is_well_formed(&self) -> bool {
            self.timestamp.len() >= 19
                && self.timestamp.contains('T')
                && matches!(
                    self.level.to_ascii_uppercase().as_str(),
                    "ERROR" | "WARN" | "INFO" | "DEBUG" | "TRACE"
                )
                && !self.message.is_empty()
        }

        fn field_f64(&self, name: &str) -> Option<f64> {
            self.fields.get(name).and_then(|v| v.as_f64())
        }
    }

    /// Parse a line written by the JSON layer.
    fn parse_log_line(line: &str) -> Result<LogRecord, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let text = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let mut fields = value
            .get("fields")
            .and_then(|f| f.as_object())
            .cloned()
            .unwrap_or_default();
        let message = fields
            .remove("message")
            .and_then(|m| m.as_str().map(str::to_string))
            .unwrap_or_default();

        Ok(LogRecord {
            timestamp: text("timestamp"),
            level: text("level"),
            message,
            target: value.get("target").and_then(|v| v.as_str()).map(str::to_string),
            fields,
        })
    }

    #[test]
    fn test_log_directory_is_app_scoped() {
        if let Ok(dir) = log_directory() {
            assert!(dir.ends_with(APP_DIR));
        }
    }

    #[test]
    fn test_json_layer_writes_parseable_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let writer = file.reopen().unwrap();
        let subscriber = tracing_subscriber::registry().with(json_layer(Mutex::new(writer)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(fps = 143.5, is_gaming = true, "Status");
        });

        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        let line = contents.lines().next().expect("one log line");
        let record = parse_log_line(line).unwrap();

        assert!(record.is_well_formed(), "{:?}", record);
        assert_eq!(record.level, "INFO");
        assert_eq!(record.message, "Status");
        assert_eq!(record.field_f64("fps"), Some(143.5));
        assert_eq!(record.fields.get("is_gaming"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_log_line("not json").is_err());
        let record = parse_log_line(r#"{"level":"INFO"}"#).unwrap();
        assert!(!record.is_well_formed());
    }

    #[test]
    fn test_init_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        // Another test may already own the global subscriber; the directory
        // is created either way.
        let _ = init_logging(Some(&nested));
        assert!(nested.is_dir());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_round_trip_level_and_message(
            level in prop_oneof![Just("ERROR"), Just("WARN"), Just("INFO"), Just("DEBUG"), Just("TRACE")],
            message in "[a-zA-Z0-9 _.,:;!?-]{1,80}",
        ) {
            let line = serde_json::json!({
                "timestamp": "2026-01-15T10:30:00.123456Z",
                "level": level,
                "fields": { "message": message },
                "target": "game_sense::sampler",
            })
            .to_string();
            let record = parse_log_line(&line).unwrap();
            prop_assert!(record.is_well_formed());
            prop_assert_eq!(record.message, message);
            prop_assert_eq!(record.target.as_deref(), Some("game_sense::sampler"));
        }
    }
}
