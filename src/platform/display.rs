//! Primary display mode detection from DRM sysfs.
//!
//! Resolution and refresh rate come from the preferred detailed timing in
//! the connector EDID; the first line of `modes` is the fallback for the
//! resolution, with 60 Hz assumed when no timing is readable.

use super::{DisplayMode, DisplaySource};
use crate::error::PlatformError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// DRM connector directory
const DRM_PATH: &str = "/sys/class/drm";

/// Refresh rate assumed when nothing better is known
pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

/// Connector types ordered by preference; internal panels first.
const CONNECTOR_PREFERENCE: &[&str] = &["eDP", "LVDS", "DSI", "DP", "HDMI", "DVI", "VGA"];

const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
const EDID_FIRST_DTD: usize = 54;

pub struct DrmDisplay {
    /// Connector directories in preference order
    connector_paths: Vec<PathBuf>,
}

impl DrmDisplay {
    pub fn new() -> Self {
        let connector_paths = Self::find_connectors(Path::new(DRM_PATH));
        debug!("Found {} DRM connector paths", connector_paths.len());
        Self { connector_paths }
    }

    fn find_connectors(drm_path: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<(usize, PathBuf)> = Vec::new();

        if !drm_path.exists() {
            debug!("DRM path {} does not exist", drm_path.display());
            return Vec::new();
        }

        if let Ok(entries) = std::fs::read_dir(drm_path) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(rank) = CONNECTOR_PREFERENCE.iter().position(|c| name.contains(c)) {
                    if entry.path().join("status").exists() {
                        paths.push((rank, entry.path()));
                    }
                }
            }
        }

        paths.sort();
        paths.into_iter().map(|(_, p)| p).collect()
    }

    fn read_connector(path: &Path) -> Option<DisplayMode> {
        let status = std::fs::read_to_string(path.join("status")).ok()?;
        if status.trim() != "connected" {
            return None;
        }

        if let Ok(edid) = std::fs::read(path.join("edid")) {
            if let Some(mode) = parse_edid_preferred_mode(&edid) {
                return Some(mode);
            }
        }

        let modes = std::fs::read_to_string(path.join("modes")).ok()?;
        let (width, height) = parse_mode_line(modes.lines().next()?)?;
        Some(DisplayMode {
            width,
            height,
            refresh_hz: DEFAULT_REFRESH_HZ,
        })
    }
}

impl Default for DrmDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySource for DrmDisplay {
    fn primary_mode(&mut self) -> Result<DisplayMode, PlatformError> {
        for path in &self.connector_paths {
            if let Some(mode) = Self::read_connector(path) {
                return Ok(mode);
            }
        }
        if !self.connector_paths.is_empty() {
            warn!("No connected DRM connector reported a usable mode");
        }
        Err(PlatformError::Unavailable("display mode"))
    }
}

/// Parse a DRM `modes` line such as `1920x1080` or `1920x1080i`.
pub fn parse_mode_line(line: &str) -> Option<(u32, u32)> {
    let (w, h) = line.trim().split_once('x')?;
    let h: String = h.chars().take_while(|c| c.is_ascii_digit()).collect();
    let width = w.parse().ok()?;
    let height = h.parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Extract the preferred mode from the first detailed timing descriptor.
pub fn parse_edid_preferred_mode(edid: &[u8]) -> Option<DisplayMode> {
    if edid.len() < 128 || edid[..8] != EDID_HEADER {
        return None;
    }

    let dtd = &edid[EDID_FIRST_DTD..EDID_FIRST_DTD + 18];
    let pixel_clock_hz = u32::from(u16::from_le_bytes([dtd[0], dtd[1]])) * 10_000;
    if pixel_clock_hz == 0 {
        // Display descriptor, not a timing
        return None;
    }

    let h_active = u32::from(dtd[2]) | (u32::from(dtd[4] >> 4) << 8);
    let h_blank = u32::from(dtd[3]) | (u32::from(dtd[4] & 0x0F) << 8);
    let v_active = u32::from(dtd[5]) | (u32::from(dtd[7] >> 4) << 8);
    let v_blank = u32::from(dtd[6]) | (u32::from(dtd[7] & 0x0F) << 8);

    let total = f64::from(h_active + h_blank) * f64::from(v_active + v_blank);
    if h_active == 0 || v_active == 0 || total <= 0.0 {
        return None;
    }

    let refresh_hz = f64::from(pixel_clock_hz) / total;
    if !(20.0..=1000.0).contains(&refresh_hz) {
        return None;
    }

    Some(DisplayMode {
        width: h_active,
        height: v_active,
        refresh_hz,
    })
}
