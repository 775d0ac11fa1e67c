//! Foreground process and window inspector.
//!
//! Resolves the foreground process, title, and fullscreen geometry at a
//! bounded cadence and keeps the primary display mode cached.

use crate::cache::{Cached, Cadence};
use crate::platform::{
    DisplayMode, DisplaySource, ForegroundSource, ForegroundWindow, WindowRect,
};
use crate::registry::normalize_process_name;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a display mode query stays valid.
const DISPLAY_MODE_TTL: Duration = Duration::from_secs(5);

/// Refresh rate used while the display cannot be queried.
pub const FALLBACK_REFRESH_HZ: f64 = 60.0;

/// Facts about the current foreground window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForegroundContext {
    /// Executable name, e.g. `cs2.exe`.
    pub process_name: Option<String>,
    pub window_title: Option<String>,
    pub pid: Option<u32>,
    pub is_fullscreen: bool,
}

/// True when a borderless window covers the screen within `tolerance`
/// (a fraction of each screen dimension).
pub fn is_fullscreen(rect: &WindowRect, borderless: bool, screen: &DisplayMode, tolerance: f64) -> bool {
    if !borderless || screen.width == 0 || screen.height == 0 {
        return false;
    }
    let close = |actual: u32, expected: u32| {
        (f64::from(actual) - f64::from(expected)).abs() <= tolerance * f64::from(expected)
    };
    close(rect.width(), screen.width) && close(rect.height(), screen.height)
}

pub struct Inspector {
    cadence: Cadence,
    tolerance: f64,
    context: ForegroundContext,
    display: Cached<DisplayMode>,
}

impl Inspector {
    pub fn new(refresh_interval: Duration, tolerance: f64) -> Self {
        Self {
            cadence: Cadence::new(refresh_interval),
            tolerance,
            context: ForegroundContext::default(),
            display: Cached::new(),
        }
    }

    /// Current context, refreshed from the providers if its interval elapsed.
    /// A failed foreground query keeps the previous context.
    pub fn refresh(
        &mut self,
        foreground: &mut dyn ForegroundSource,
        display: &mut dyn DisplaySource,
        now: Instant,
    ) -> &ForegroundContext {
        if self.cadence.poll(now) {
            match foreground.foreground() {
                Ok(window) => {
                    let screen = self.display_mode(display, now);
                    self.context = self.build_context(window, screen.as_ref());
                }
                Err(e) => debug!("Foreground query failed: {}", e),
            }
        }
        &self.context
    }

    pub fn context(&self) -> &ForegroundContext {
        &self.context
    }

    /// Primary display mode, re-queried at most every few seconds.
    pub fn display_mode(&mut self, display: &mut dyn DisplaySource, now: Instant) -> Option<DisplayMode> {
        if !self.display.is_fresh(now, DISPLAY_MODE_TTL) {
            match display.primary_mode() {
                Ok(mode) if mode.refresh_hz.is_finite() && mode.refresh_hz > 0.0 => {
                    self.display.update(mode, now);
                }
                Ok(mode) => debug!("Ignoring display mode with refresh {}", mode.refresh_hz),
                Err(e) => debug!("Display mode query failed: {}", e),
            }
        }
        self.display.value()
    }

    /// Last known refresh rate, or 60 Hz when never measured.
    pub fn refresh_rate(&mut self, display: &mut dyn DisplaySource, now: Instant) -> f64 {
        self.display_mode(display, now)
            .map_or(FALLBACK_REFRESH_HZ, |m| m.refresh_hz)
    }

    fn build_context(&self, window: Option<ForegroundWindow>, screen: Option<&DisplayMode>) -> ForegroundContext {
        let Some(window) = window else {
            return ForegroundContext::default();
        };

        let is_fullscreen = match (window.rect.as_ref(), screen) {
            (Some(rect), Some(screen)) => is_fullscreen(rect, window.borderless, screen, self.tolerance),
            _ => false,
        };

        ForegroundContext {
            process_name: window
                .process_name
                .map(|p| p.rsplit(['/', '\\']).next().unwrap_or(&p).to_lowercase())
                .filter(|p| !normalize_process_name(p).is_empty()),
            window_title: window.title.filter(|t| !t.trim().is_empty()),
            pid: window.pid,
            is_fullscreen,
        }
    }
}
