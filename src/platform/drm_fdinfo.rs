//! Per-process GPU engine busy time from DRM fdinfo.
//!
//! Every open DRM client exposes `drm-client-id` and cumulative
//! `drm-engine-<name>: <n> ns` lines under `/proc/<pid>/fdinfo/<fd>`
//! (amdgpu, i915, xe, msm, panfrost). Several fds can share one client, so
//! totals are summed once per client id.

use super::{EngineCounterSource, Unavailable};
use crate::error::PlatformError;
use crate::registry::normalize_process_name;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const PROC_PATH: &str = "/proc";

/// Engines that carry 3D rendering work.
const RENDER_ENGINES: &[&str] = &["gfx", "render"];

/// Counters for the running platform.
pub fn detect() -> Box<dyn EngineCounterSource> {
    if cfg!(target_os = "linux") && Path::new(PROC_PATH).is_dir() {
        Box::new(DrmFdinfoCounters::new())
    } else {
        Box::new(Unavailable("GPU engine counters"))
    }
}

/// Client id and summed render-engine busy time from one fdinfo file.
/// `None` for files that do not belong to a DRM client.
pub fn parse_fdinfo(text: &str) -> Option<(u64, u64)> {
    let mut client_id = None;
    let mut busy_ns = 0u64;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        if key == "drm-client-id" {
            client_id = value.parse().ok();
        } else if let Some(engine) = key.strip_prefix("drm-engine-") {
            if !RENDER_ENGINES.contains(&engine) {
                continue;
            }
            if let Some(ns) = value.strip_suffix("ns").and_then(|n| n.trim().parse::<u64>().ok()) {
                busy_ns = busy_ns.saturating_add(ns);
            }
        }
    }

    client_id.map(|id| (id, busy_ns))
}

pub struct DrmFdinfoCounters {
    proc_root: PathBuf,
}

impl DrmFdinfoCounters {
    pub fn new() -> Self {
        Self::with_root(PROC_PATH)
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// First pid whose `comm` matches the process name.
    fn find_pid(&self, process_name: &str) -> Result<Option<u32>, PlatformError> {
        let wanted = normalize_process_name(process_name);
        if wanted.is_empty() {
            return Ok(None);
        }

        for entry in std::fs::read_dir(&self.proc_root)?.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // Processes exit between listing and reading; skip them.
            let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
                continue;
            };
            let comm = normalize_process_name(comm.trim());
            // comm is truncated to 15 bytes by the kernel.
            if !comm.is_empty() && (comm == wanted || (comm.len() == 15 && wanted.starts_with(&comm))) {
                return Ok(Some(pid));
            }
        }

        Ok(None)
    }

    fn busy_time_for_pid(&self, pid: u32) -> Result<u64, PlatformError> {
        let fdinfo = self.proc_root.join(pid.to_string()).join("fdinfo");
        let mut clients: HashMap<u64, u64> = HashMap::new();

        for entry in std::fs::read_dir(&fdinfo)?.flatten() {
            // fds close while we scan.
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            if let Some((client, busy)) = parse_fdinfo(&text) {
                clients.entry(client).or_insert(busy);
            }
        }

        if clients.is_empty() {
            return Err(PlatformError::QueryFailed {
                provider: "drm fdinfo",
                message: format!("process {} has no DRM clients", pid),
            });
        }

        Ok(clients.values().fold(0u64, |sum, busy| sum.saturating_add(*busy)))
    }
}

impl Default for DrmFdinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCounterSource for DrmFdinfoCounters {
    fn busy_time_ns(
        &mut self,
        pid: Option<u32>,
        process_name: Option<&str>,
    ) -> Result<u64, PlatformError> {
        let pid = match (pid, process_name) {
            (Some(pid), _) => pid,
            (None, Some(name)) => self.find_pid(name)?.ok_or_else(|| {
                debug!("No process named {} for engine counters", name);
                PlatformError::QueryFailed {
                    provider: "drm fdinfo",
                    message: format!("no process named {}", name),
                }
            })?,
            (None, None) => return Err(PlatformError::Unavailable("foreground process")),
        };

        self.busy_time_for_pid(pid)
    }
}
