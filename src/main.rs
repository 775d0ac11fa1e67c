//! GameSense daemon.
//!
//! Starts the sampling loop over the detected platform providers and logs
//! the published snapshots until SIGINT/SIGTERM.
//!
//! Usage: `game-sensed [config-path]`

use game_sense::{logging, ConfigManager, Platform, Sampler};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Interval between compact status lines at info level
const STATUS_LOG_INTERVAL_SECS: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging(None).map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "GameSense daemon starting");

    let result = run_daemon().await;

    match &result {
        Ok(()) => info!("GameSense daemon shut down gracefully"),
        Err(e) => error!("GameSense daemon error: {}", e),
    }

    result
}

async fn run_daemon() -> Result<(), Box<dyn std::error::Error>> {
    // An explicit path must exist; the default location falls back to defaults.
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => ConfigManager::load(&path)?,
        None => ConfigManager::load_or_default(&ConfigManager::default_path())?,
    };
    info!("Configuration loaded from {:?}", config.path());

    let platform = Platform::detect();
    let handle = Sampler::new(config.get(), platform)?.start()?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(signal_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    info!("GameSense daemon initialized and running");

    let mut events = handle.subscribe();
    let mut status = tokio::time::interval(Duration::from_secs(STATUS_LOG_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            changed = events.changed() => {
                if changed.is_err() {
                    warn!("Sampling loop exited unexpectedly");
                    break;
                }
                let event = *events.borrow_and_update();
                match serde_json::to_string(&event) {
                    Ok(json) => debug!(snapshot = %json, "Published snapshot"),
                    Err(e) => debug!("Failed to serialize snapshot: {}", e),
                }
            }
            _ = status.tick() => {
                let event = handle.latest();
                info!(
                    cpu = event.cpu_usage,
                    gpu_load = event.gpu_load,
                    gpu_temp = event.gpu_temp,
                    net_down = event.net_down,
                    net_up = event.net_up,
                    is_gaming = event.is_gaming,
                    fps = event.fps,
                    "Status"
                );
            }
        }
    }

    info!("Shutdown signal received, stopping sampler...");
    handle
        .shutdown(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS))
        .await?;
    drop(shutdown_tx);

    info!("Sampler stopped");
    Ok(())
}

/// Handles SIGTERM and SIGINT.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}
