//! Foreground window inspection.
//!
//! Linux asks the X server (or XWayland) through EWMH: `_NET_ACTIVE_WINDOW`
//! names the window, `_NET_WM_PID` its process, and `_NET_WM_STATE`
//! carrying `_NET_WM_STATE_FULLSCREEN` marks an undecorated fullscreen
//! window. Windows uses the Win32 window APIs directly.

use super::{ForegroundSource, ForegroundWindow, WindowRect};
use crate::error::PlatformError;
use std::path::Path;

/// Foreground provider for the running platform.
#[cfg(target_os = "linux")]
pub fn detect() -> Box<dyn ForegroundSource> {
    Box::new(x11::X11Foreground::new())
}

#[cfg(windows)]
pub fn detect() -> Box<dyn ForegroundSource> {
    Box::new(win32::Win32Foreground::new())
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn detect() -> Box<dyn ForegroundSource> {
    Box::new(super::Unavailable("foreground window"))
}

/// Process name from the contents of `/proc/<pid>/comm`.
pub fn parse_comm(text: &str) -> Option<String> {
    let name = text.trim_end_matches(['\n', '\0']).trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Executable name of a running process, read from procfs.
pub fn proc_comm(proc_root: &Path, pid: u32) -> Result<Option<String>, PlatformError> {
    let text = std::fs::read_to_string(proc_root.join(pid.to_string()).join("comm"))?;
    Ok(parse_comm(&text))
}

/// Window title from raw property bytes; empty titles are absent.
pub fn decode_title(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let title = String::from_utf8_lossy(&bytes[..end]).trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// Screen-space rectangle from an origin and size.
pub fn rect_from_origin(x: i32, y: i32, width: u32, height: u32) -> WindowRect {
    let right = x.saturating_add(i32::try_from(width).unwrap_or(i32::MAX));
    let bottom = y.saturating_add(i32::try_from(height).unwrap_or(i32::MAX));
    WindowRect::new(x, y, right, bottom)
}

/// Final path component of an executable image path.
pub fn image_file_name(path: &str) -> Option<String> {
    path.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(target_os = "linux")]
pub mod x11 {
    use super::*;
    use std::time::{Duration, Instant};
    use tracing::{debug, info};
    use x11rb::connection::Connection;
    use x11rb::errors::{ConnectionError, ReplyError};
    use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, Window};
    use x11rb::rust_connection::RustConnection;

    const PROVIDER: &str = "x11 foreground";
    const PROC_PATH: &str = "/proc";

    /// Minimum delay between connection attempts while no X server answers.
    pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

    /// Longest title read, in 32-bit units.
    const MAX_TITLE_WORDS: u32 = 256;

    enum X11Failure {
        /// The connection is unusable and must be reopened.
        Connection(String),
        /// One request failed (window gone, property missing).
        Request(String),
    }

    impl From<ConnectionError> for X11Failure {
        fn from(e: ConnectionError) -> Self {
            X11Failure::Connection(e.to_string())
        }
    }

    impl From<ReplyError> for X11Failure {
        fn from(e: ReplyError) -> Self {
            match e {
                ReplyError::ConnectionError(e) => X11Failure::Connection(e.to_string()),
                ReplyError::X11Error(e) => X11Failure::Request(format!("{:?}", e.error_kind)),
            }
        }
    }

    struct Atoms {
        active_window: Atom,
        wm_pid: Atom,
        wm_name: Atom,
        utf8_string: Atom,
        wm_state: Atom,
        wm_state_fullscreen: Atom,
    }

    struct Session {
        conn: RustConnection,
        root: Window,
        atoms: Atoms,
    }

    impl Session {
        fn open(display: Option<&str>) -> Result<Self, PlatformError> {
            let (conn, screen) = x11rb::connect(display).map_err(|e| {
                debug!("X11 connection failed: {}", e);
                PlatformError::Unavailable("X11 display")
            })?;
            let root = conn
                .setup()
                .roots
                .get(screen)
                .map(|s| s.root)
                .ok_or(PlatformError::Unavailable("X11 screen"))?;

            let atoms = Self::intern_atoms(&conn).map_err(|e| match e {
                X11Failure::Connection(message) | X11Failure::Request(message) => {
                    PlatformError::QueryFailed {
                        provider: PROVIDER,
                        message,
                    }
                }
            })?;

            Ok(Self { conn, root, atoms })
        }

        fn intern_atoms(conn: &RustConnection) -> Result<Atoms, X11Failure> {
            let intern = |name: &[u8]| -> Result<Atom, X11Failure> {
                Ok(conn.intern_atom(false, name)?.reply()?.atom)
            };
            Ok(Atoms {
                active_window: intern(b"_NET_ACTIVE_WINDOW")?,
                wm_pid: intern(b"_NET_WM_PID")?,
                wm_name: intern(b"_NET_WM_NAME")?,
                utf8_string: intern(b"UTF8_STRING")?,
                wm_state: intern(b"_NET_WM_STATE")?,
                wm_state_fullscreen: intern(b"_NET_WM_STATE_FULLSCREEN")?,
            })
        }

        fn property32(&self, window: Window, property: Atom, kind: AtomEnum, words: u32) -> Result<Vec<u32>, X11Failure> {
            let reply = self
                .conn
                .get_property(false, window, property, kind, 0, words)?
                .reply()?;
            Ok(reply.value32().map(|v| v.collect()).unwrap_or_default())
        }

        fn active_window(&self) -> Result<Option<Window>, X11Failure> {
            let windows = self.property32(self.root, self.atoms.active_window, AtomEnum::WINDOW, 1)?;
            Ok(windows.first().copied().filter(|&w| w != x11rb::NONE))
        }

        fn title(&self, window: Window) -> Result<Option<String>, X11Failure> {
            let reply = self
                .conn
                .get_property(false, window, self.atoms.wm_name, self.atoms.utf8_string, 0, MAX_TITLE_WORDS)?
                .reply()?;
            if let Some(title) = decode_title(&reply.value) {
                return Ok(Some(title));
            }

            let legacy = self
                .conn
                .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, MAX_TITLE_WORDS)?
                .reply()?;
            Ok(decode_title(&legacy.value))
        }

        fn rect(&self, window: Window) -> Result<WindowRect, X11Failure> {
            let geometry = self.conn.get_geometry(window)?.reply()?;
            let origin = self
                .conn
                .translate_coordinates(window, self.root, 0, 0)?
                .reply()?;
            Ok(rect_from_origin(
                i32::from(origin.dst_x),
                i32::from(origin.dst_y),
                u32::from(geometry.width),
                u32::from(geometry.height),
            ))
        }

        fn foreground(&self) -> Result<Option<ForegroundWindow>, X11Failure> {
            let Some(window) = self.active_window()? else {
                return Ok(None);
            };

            let pid = self
                .property32(window, self.atoms.wm_pid, AtomEnum::CARDINAL, 1)?
                .first()
                .copied()
                .filter(|&pid| pid != 0);
            let process_name = match pid {
                Some(pid) => proc_comm(Path::new(PROC_PATH), pid).unwrap_or_else(|e| {
                    debug!("Could not read process name for pid {}: {}", pid, e);
                    None
                }),
                None => None,
            };
            let borderless = self
                .property32(window, self.atoms.wm_state, AtomEnum::ATOM, 32)?
                .contains(&self.atoms.wm_state_fullscreen);

            Ok(Some(ForegroundWindow {
                pid,
                process_name,
                title: self.title(window)?,
                rect: Some(self.rect(window)?),
                borderless,
            }))
        }
    }

    /// EWMH foreground window reader over a lazily opened X connection.
    pub struct X11Foreground {
        display: Option<String>,
        session: Option<Session>,
        last_attempt: Option<Instant>,
    }

    impl X11Foreground {
        /// Connect to the display named by `$DISPLAY`.
        pub fn new() -> Self {
            Self::with_display(None)
        }

        pub fn with_display(display: Option<String>) -> Self {
            Self {
                display,
                session: None,
                last_attempt: None,
            }
        }

        fn ensure_session(&mut self) -> Result<&Session, PlatformError> {
            if self.session.is_none() {
                let retry_due = self
                    .last_attempt
                    .map_or(true, |t| t.elapsed() >= RECONNECT_INTERVAL);
                if !retry_due {
                    return Err(PlatformError::Unavailable("X11 display"));
                }
                self.last_attempt = Some(Instant::now());
                let session = Session::open(self.display.as_deref())?;
                info!("Connected to X11 display for foreground tracking");
                self.session = Some(session);
            }
            self.session
                .as_ref()
                .ok_or(PlatformError::Unavailable("X11 display"))
        }
    }

    impl Default for X11Foreground {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ForegroundSource for X11Foreground {
        fn foreground(&mut self) -> Result<Option<ForegroundWindow>, PlatformError> {
            let result = self.ensure_session()?.foreground();
            match result {
                Ok(window) => Ok(window),
                Err(X11Failure::Request(message)) => Err(PlatformError::QueryFailed {
                    provider: PROVIDER,
                    message,
                }),
                Err(X11Failure::Connection(message)) => {
                    debug!("X11 connection lost: {}", message);
                    self.session = None;
                    Err(PlatformError::QueryFailed {
                        provider: PROVIDER,
                        message,
                    })
                }
            }
        }
    }
}

#[cfg(windows)]
pub mod win32 {
    use super::*;
    use windows_sys::Win32::Foundation::{CloseHandle, RECT};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowLongW, GetWindowRect, GetWindowTextW, GetWindowThreadProcessId,
        GWL_STYLE, WS_CAPTION, WS_THICKFRAME,
    };

    const MAX_TITLE_CHARS: usize = 512;
    const MAX_PATH_CHARS: usize = 1024;

    /// No caption and no sizing frame.
    pub fn is_borderless_style(style: u32) -> bool {
        style & (WS_CAPTION | WS_THICKFRAME) == 0
    }

    fn image_name(pid: u32) -> Option<String> {
        let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if process.is_null() {
            return None;
        }

        let mut buffer = vec![0u16; MAX_PATH_CHARS];
        let mut len = buffer.len() as u32;
        let ok = unsafe { QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, buffer.as_mut_ptr(), &mut len) };
        unsafe { CloseHandle(process) };

        if ok == 0 {
            return None;
        }
        image_file_name(&String::from_utf16_lossy(&buffer[..len as usize]))
    }

    fn title(hwnd: windows_sys::Win32::Foundation::HWND) -> Option<String> {
        let mut buffer = vec![0u16; MAX_TITLE_CHARS];
        let len = unsafe { GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32) };
        if len <= 0 {
            return None;
        }
        let title = String::from_utf16_lossy(&buffer[..len as usize]);
        decode_title(title.as_bytes())
    }

    /// Foreground window reader over the Win32 window APIs.
    pub struct Win32Foreground;

    impl Win32Foreground {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for Win32Foreground {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ForegroundSource for Win32Foreground {
        fn foreground(&mut self) -> Result<Option<ForegroundWindow>, PlatformError> {
            let hwnd = unsafe { GetForegroundWindow() };
            if hwnd.is_null() {
                return Ok(None);
            }

            let mut pid = 0u32;
            unsafe { GetWindowThreadProcessId(hwnd, &mut pid) };
            let pid = (pid != 0).then_some(pid);

            let mut rect: RECT = unsafe { std::mem::zeroed() };
            let rect = if unsafe { GetWindowRect(hwnd, &mut rect) } != 0 {
                Some(WindowRect::new(rect.left, rect.top, rect.right, rect.bottom))
            } else {
                None
            };

            let style = unsafe { GetWindowLongW(hwnd, GWL_STYLE) } as u32;

            Ok(Some(ForegroundWindow {
                pid,
                process_name: pid.and_then(image_name),
                title: title(hwnd),
                rect,
                borderless: is_borderless_style(style),
            }))
        }
    }

}
