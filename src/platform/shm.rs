//! Shared-memory frame publisher reader.
//!
//! Frame-rate overlays publish their measurements in a named shared memory
//! segment. On Linux that is MangoHud's `/mangohud-overlay` (one `fps_val`
//! and `frametime` pair for the hooked game); on Windows it is the RTSS v2
//! segment with one entry per hooked application. The segment is mapped
//! read-only and parsed into `FrameEntry` values.

use super::{FrameEntry, FrameSource};
use crate::error::ShmError;
use std::time::{Duration, Instant};

/// MangoHud overlay segment.
pub const MANGOHUD_SHM_NAME: &str = "/mangohud-overlay";

/// RivaTuner Statistics Server segment.
pub const RTSS_SHM_NAME: &str = "RTSSSharedMemoryV2";

/// Minimum delay between reconnection attempts while the publisher is absent.
pub const SHM_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How a segment's bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLayout {
    /// Header plus an array of per-application entries.
    Rtss,
    /// Two native-endian u64s: `fps_val` and `frametime` in microseconds.
    MangoHud,
}

impl SegmentLayout {
    /// Smallest segment that can hold this layout's fixed part.
    pub fn min_len(self) -> usize {
        match self {
            SegmentLayout::Rtss => HEADER_SIZE,
            SegmentLayout::MangoHud => MANGOHUD_DATA_SIZE,
        }
    }

    pub fn parse(self, bytes: &[u8]) -> Result<Vec<FrameEntry>, ShmError> {
        match self {
            SegmentLayout::Rtss => parse_frame_entries(bytes),
            SegmentLayout::MangoHud => parse_mangohud(bytes),
        }
    }
}

/// C layout of MangoHud's published data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MangoHudData {
    pub fps_val: u64,
    /// Frame time in microseconds.
    pub frametime: u64,
}

pub const MANGOHUD_DATA_SIZE: usize = std::mem::size_of::<MangoHudData>();

fn read_u64_ne(bytes: &[u8], offset: usize) -> Result<u64, ShmError> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_ne_bytes)
        .ok_or_else(|| ShmError::InvalidData(format!("read past end at offset {}", offset)))
}

impl MangoHudData {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShmError> {
        Ok(Self {
            fps_val: read_u64_ne(bytes, 0)?,
            frametime: read_u64_ne(bytes, 8)?,
        })
    }

    /// Frames per second, from `fps_val` or else from the frame time.
    pub fn fps(&self) -> Option<f64> {
        if self.fps_val > 0 {
            Some(self.fps_val as f64)
        } else if self.frametime > 0 {
            Some(1_000_000.0 / self.frametime as f64)
        } else {
            None
        }
    }
}

/// MangoHud publishes for the hooked game only and carries no pid, so the
/// single entry has pid 0 and no name; selection falls back to it.
pub fn parse_mangohud(bytes: &[u8]) -> Result<Vec<FrameEntry>, ShmError> {
    let data = MangoHudData::from_bytes(bytes)?;
    Ok(data
        .fps()
        .map(|fps| {
            vec![FrameEntry {
                pid: 0,
                process_name: String::new(),
                fps,
            }]
        })
        .unwrap_or_default())
}

/// 'RTSS' read as a little-endian u32.
pub const SIGNATURE: u32 = 0x5254_5353;
pub const MIN_VERSION: u32 = 0x0002_0000;

/// Header field offsets.
const OFF_SIGNATURE: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_ENTRY_SIZE: usize = 8;
const OFF_ARRAY_OFFSET: usize = 12;
const OFF_ENTRY_COUNT: usize = 16;
pub const HEADER_SIZE: usize = 20;

/// Per-entry field offsets.
const ENTRY_PID: usize = 0;
const ENTRY_NAME: usize = 4;
pub const ENTRY_NAME_LEN: usize = 260;
const ENTRY_TIME0: usize = 268;
const ENTRY_TIME1: usize = 272;
const ENTRY_FRAMES: usize = 276;
pub const MIN_ENTRY_SIZE: usize = 280;

/// Upper bound on published entries, guards against a corrupted header.
const MAX_ENTRIES: usize = 256;

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ShmError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ShmError::InvalidData(format!("read past end at offset {}", offset)))
}

/// Parse every live application entry out of a segment snapshot.
///
/// Entries with pid 0 (free slots) or an empty measurement window are
/// skipped rather than reported as 0 fps.
pub fn parse_frame_entries(bytes: &[u8]) -> Result<Vec<FrameEntry>, ShmError> {
    let signature = read_u32(bytes, OFF_SIGNATURE)?;
    if signature != SIGNATURE {
        return Err(ShmError::InvalidData(format!(
            "unexpected signature {:#010x}",
            signature
        )));
    }

    let version = read_u32(bytes, OFF_VERSION)?;
    if version < MIN_VERSION {
        return Err(ShmError::InvalidData(format!(
            "unsupported layout version {:#x}",
            version
        )));
    }

    let entry_size = read_u32(bytes, OFF_ENTRY_SIZE)? as usize;
    let array_offset = read_u32(bytes, OFF_ARRAY_OFFSET)? as usize;
    let count = read_u32(bytes, OFF_ENTRY_COUNT)? as usize;

    if entry_size < MIN_ENTRY_SIZE {
        return Err(ShmError::InvalidData(format!(
            "entry size {} smaller than {}",
            entry_size, MIN_ENTRY_SIZE
        )));
    }
    if count > MAX_ENTRIES {
        return Err(ShmError::InvalidData(format!("entry count {} too large", count)));
    }

    let mut entries = Vec::new();
    for i in 0..count {
        let base = array_offset + i * entry_size;
        let entry = bytes.get(base..base + entry_size).ok_or_else(|| {
            ShmError::InvalidData(format!("entry {} extends past segment end", i))
        })?;

        let pid = read_u32(entry, ENTRY_PID)?;
        if pid == 0 {
            continue;
        }

        let time0 = read_u32(entry, ENTRY_TIME0)?;
        let time1 = read_u32(entry, ENTRY_TIME1)?;
        let frames = read_u32(entry, ENTRY_FRAMES)?;
        let window_ms = time1.wrapping_sub(time0);
        if window_ms == 0 || frames == 0 {
            continue;
        }

        let raw_name = &entry[ENTRY_NAME..ENTRY_NAME + ENTRY_NAME_LEN];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(ENTRY_NAME_LEN);
        let process_name = String::from_utf8_lossy(&raw_name[..end]).to_lowercase();

        entries.push(FrameEntry {
            pid,
            process_name,
            fps: 1000.0 * f64::from(frames) / f64::from(window_ms),
        });
    }

    Ok(entries)
}

/// Read-only mapping of the frame publisher segment.
///
/// The segment is (re)opened lazily so the publisher may start after the
/// monitor. A segment that stops parsing is dropped and remapped later.
#[cfg(any(unix, windows))]
pub struct SharedMemoryFrames {
    name: String,
    layout: SegmentLayout,
    mapping: Option<Mapping>,
    last_attempt: Option<Instant>,
}

#[cfg(any(unix, windows))]
struct Mapping {
    ptr: *const u8,
    len: usize,
    #[cfg(unix)]
    fd: i32,
    #[cfg(windows)]
    handle: windows_sys::Win32::Foundation::HANDLE,
}

// Safety: the mapping is read-only, owned exclusively by this struct, and
// released in Drop; no aliasing mutable access exists in this process.
#[cfg(any(unix, windows))]
unsafe impl Send for Mapping {}

#[cfg(any(unix, windows))]
impl Mapping {
    /// Copy the segment so parsing sees one consistent length.
    fn snapshot(&self) -> Vec<u8> {
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        bytes.to_vec()
    }

    fn too_small(len: usize, layout: SegmentLayout) -> ShmError {
        ShmError::InvalidData(format!(
            "segment of {} bytes is smaller than the {:?} layout ({} bytes)",
            len,
            layout,
            layout.min_len()
        ))
    }
}

#[cfg(unix)]
impl Mapping {
    fn open(name: &str, layout: SegmentLayout) -> Result<Self, ShmError> {
        use libc::{c_char, close, fstat, mmap, shm_open, MAP_FAILED, MAP_SHARED, O_RDONLY, PROT_READ};
        use std::ffi::CString;

        let shm_name = CString::new(name)
            .map_err(|_| ShmError::InvalidData("Invalid SHM name".to_string()))?;

        let fd = unsafe { shm_open(shm_name.as_ptr() as *const c_char, O_RDONLY, 0) };
        if fd < 0 {
            return Err(ShmError::OpenFailed {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { fstat(fd, &mut stat) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { close(fd) };
            return Err(ShmError::OpenFailed {
                name: name.to_string(),
                source: err,
            });
        }

        let len = stat.st_size as usize;
        if len < layout.min_len() {
            unsafe { close(fd) };
            return Err(Self::too_small(len, layout));
        }

        let ptr = unsafe { mmap(std::ptr::null_mut(), len, PROT_READ, MAP_SHARED, fd, 0) };
        if ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { close(fd) };
            return Err(ShmError::MmapFailed(err));
        }

        Ok(Self {
            ptr: ptr as *const u8,
            len,
            fd,
        })
    }
}

#[cfg(unix)]
impl Drop for Mapping {
    fn drop(&mut self) {
        use libc::{close, munmap};

        if !self.ptr.is_null() {
            unsafe {
                munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }

        if self.fd >= 0 {
            unsafe {
                close(self.fd);
            }
        }
    }
}

#[cfg(windows)]
impl Mapping {
    fn open(name: &str, layout: SegmentLayout) -> Result<Self, ShmError> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::{
            MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery, FILE_MAP_READ,
            MEMORY_BASIC_INFORMATION,
        };

        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

        let handle = unsafe { OpenFileMappingW(FILE_MAP_READ, 0, wide.as_ptr()) };
        if handle.is_null() {
            return Err(ShmError::OpenFailed {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_READ, 0, 0, 0) };
        if view.Value.is_null() {
            let err = std::io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(ShmError::MmapFailed(err));
        }

        // The mapping object does not expose its size; the view's region does.
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let written = unsafe {
            VirtualQuery(
                view.Value,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        let len = if written == 0 { 0 } else { info.RegionSize };
        if len < layout.min_len() {
            unsafe {
                UnmapViewOfFile(view);
                CloseHandle(handle);
            }
            return Err(Self::too_small(len, layout));
        }

        Ok(Self {
            ptr: view.Value as *const u8,
            len,
            handle,
        })
    }
}

#[cfg(windows)]
impl Drop for Mapping {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::{UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS};

        if !self.ptr.is_null() {
            unsafe {
                UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.ptr as *mut std::ffi::c_void,
                });
            }
        }

        if !self.handle.is_null() {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }
}

#[cfg(any(unix, windows))]
impl SharedMemoryFrames {
    /// The publisher native to this platform: MangoHud on Unix, RTSS on
    /// Windows.
    pub fn new() -> Self {
        if cfg!(windows) {
            Self::with_name(RTSS_SHM_NAME, SegmentLayout::Rtss)
        } else {
            Self::with_name(MANGOHUD_SHM_NAME, SegmentLayout::MangoHud)
        }
    }

    pub fn with_name(name: &str, layout: SegmentLayout) -> Self {
        Self {
            name: name.to_string(),
            layout,
            mapping: None,
            last_attempt: None,
        }
    }

    fn ensure_mapped(&mut self) -> Result<&Mapping, ShmError> {
        if self.mapping.is_none() {
            let retry_due = self
                .last_attempt
                .map_or(true, |t| t.elapsed() >= SHM_RETRY_INTERVAL);
            if !retry_due {
                return Err(ShmError::NotAvailable);
            }
            self.last_attempt = Some(Instant::now());
            match Mapping::open(&self.name, self.layout) {
                Ok(mapping) => {
                    tracing::info!("Connected to frame publisher shared memory {}", self.name);
                    self.mapping = Some(mapping);
                }
                Err(ShmError::OpenFailed { .. }) => return Err(ShmError::NotAvailable),
                Err(e) => return Err(e),
            }
        }
        self.mapping.as_ref().ok_or(ShmError::NotAvailable)
    }
}

#[cfg(any(unix, windows))]
impl Default for SharedMemoryFrames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(unix, windows))]
impl FrameSource for SharedMemoryFrames {
    fn entries(&mut self) -> Result<Vec<FrameEntry>, ShmError> {
        let bytes = self.ensure_mapped()?.snapshot();
        match self.layout.parse(&bytes) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // Publisher restarted or tore down the segment; remap later.
                self.mapping = None;
                Err(e)
            }
        }
    }
}

/// Stub for platforms without named shared memory.
#[cfg(not(any(unix, windows)))]
pub struct SharedMemoryFrames;

#[cfg(not(any(unix, windows)))]
impl SharedMemoryFrames {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(any(unix, windows)))]
impl Default for SharedMemoryFrames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(any(unix, windows)))]
impl FrameSource for SharedMemoryFrames {
    fn entries(&mut self) -> Result<Vec<FrameEntry>, ShmError> {
        Err(ShmError::NotAvailable)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Build a segment image with the given (pid, name, window_ms, frames) entries.
    pub(crate) fn build_segment(entries: &[(u32, &str, u32, u32)]) -> Vec<u8> {
        let entry_size = MIN_ENTRY_SIZE;
        let mut bytes = vec![0u8; HEADER_SIZE + entry_size * entries.len()];
        bytes[0..4].copy_from_slice(&SIGNATURE.to_le_bytes());
        bytes[4..8].copy_from_slice(&MIN_VERSION.to_le_bytes());
        bytes[8..12].copy_from_slice(&(entry_size as u32).to_le_bytes());
        bytes[12..16].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        bytes[16..20].copy_from_slice(&(entries.len() as u32).to_le_bytes());

        for (i, (pid, name, window_ms, frames)) in entries.iter().enumerate() {
            let base = HEADER_SIZE + i * entry_size;
            bytes[base..base + 4].copy_from_slice(&pid.to_le_bytes());
            let name = name.as_bytes();
            bytes[base + ENTRY_NAME..base + ENTRY_NAME + name.len()].copy_from_slice(name);
            let time0 = 10_000u32;
            bytes[base + ENTRY_TIME0..base + ENTRY_TIME0 + 4].copy_from_slice(&time0.to_le_bytes());
            bytes[base + ENTRY_TIME1..base + ENTRY_TIME1 + 4]
                .copy_from_slice(&(time0 + window_ms).to_le_bytes());
            bytes[base + ENTRY_FRAMES..base + ENTRY_FRAMES + 4]
                .copy_from_slice(&frames.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_parse_entries_computes_fps() {
        let bytes = build_segment(&[
            (1234, "C:\\Games\\CS2\\cs2.exe", 1000, 144),
            (0, "", 0, 0),
            (5678, "Dota2.exe", 500, 30),
        ]);

        let entries = parse_frame_entries(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pid, 1234);
        assert_eq!(entries[0].process_name, "c:\\games\\cs2\\cs2.exe");
        assert!((entries[0].fps - 144.0).abs() < 1e-9);
        assert!((entries[1].fps - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_skips_empty_window() {
        let bytes = build_segment(&[(42, "game.exe", 0, 100)]);
        assert!(parse_frame_entries(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let mut bytes = build_segment(&[(42, "game.exe", 1000, 60)]);
        bytes[0] = b'X';
        assert!(matches!(
            parse_frame_entries(&bytes),
            Err(ShmError::InvalidData(_))
        ));
    }

    #[test]
    fn test_parse_rejects_truncated_segment() {
        let bytes = build_segment(&[(42, "game.exe", 1000, 60)]);
        let truncated = &bytes[..bytes.len() - 10];
        assert!(parse_frame_entries(truncated).is_err());
    }

    #[test]
    fn test_parse_rejects_old_version() {
        let mut bytes = build_segment(&[]);
        bytes[4..8].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        assert!(parse_frame_entries(&bytes).is_err());
    }

    fn mangohud_bytes(fps_val: u64, frametime: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MANGOHUD_DATA_SIZE);
        bytes.extend_from_slice(&fps_val.to_ne_bytes());
        bytes.extend_from_slice(&frametime.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_mangohud_layout_matches_c_struct() {
        assert_eq!(MANGOHUD_DATA_SIZE, 16);
        assert_eq!(SegmentLayout::MangoHud.min_len(), 16);
        assert_eq!(SegmentLayout::Rtss.min_len(), HEADER_SIZE);
    }

    #[test]
    fn test_parse_mangohud_single_entry() {
        let entries = parse_mangohud(&mangohud_bytes(144, 6944)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, 0);
        assert!(entries[0].process_name.is_empty());
        assert_eq!(entries[0].fps, 144.0);

        // fps_val not yet written: derive from the frame time.
        let entries = parse_mangohud(&mangohud_bytes(0, 10_000)).unwrap();
        assert!((entries[0].fps - 100.0).abs() < 1e-9);

        assert!(parse_mangohud(&mangohud_bytes(0, 0)).unwrap().is_empty());
        assert!(parse_mangohud(&[0u8; 12]).is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
            let _ = parse_frame_entries(&bytes);
        }

        #[test]
        fn prop_parsed_fps_matches_frames_over_window(window_ms in 1u32..10_000u32, frames in 1u32..10_000u32) {
            let bytes = build_segment(&[(7, "game.exe", window_ms, frames)]);
            let entries = parse_frame_entries(&bytes).unwrap();
            prop_assert_eq!(entries.len(), 1);
            let expected = 1000.0 * frames as f64 / window_ms as f64;
            prop_assert!((entries[0].fps - expected).abs() < 1e-9);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_segment_is_not_available() {
        let mut frames =
            SharedMemoryFrames::with_name("/game-sense-test-missing-segment", SegmentLayout::MangoHud);
        assert!(matches!(frames.entries(), Err(ShmError::NotAvailable)));
        // Second call inside the retry window must not touch the OS again.
        assert!(matches!(frames.entries(), Err(ShmError::NotAvailable)));
    }

    #[cfg(target_os = "linux")]
    fn publish_segment(name: &str, image: &[u8]) -> std::ffi::CString {
        use libc::{c_char, close, ftruncate, shm_open, O_CREAT, O_RDWR};

        let c_name = std::ffi::CString::new(name).unwrap();
        unsafe {
            let fd = shm_open(c_name.as_ptr() as *const c_char, O_CREAT | O_RDWR, 0o600);
            assert!(fd >= 0);
            assert_eq!(ftruncate(fd, image.len() as libc::off_t), 0);
            let written = libc::write(fd, image.as_ptr() as *const libc::c_void, image.len());
            assert_eq!(written as usize, image.len());
            close(fd);
        }
        c_name
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reads_published_mangohud_segment() {
        let name = format!("/game-sense-test-mangohud-{}", std::process::id());
        let c_name = publish_segment(&name, &mangohud_bytes(240, 4166));

        let mut frames = SharedMemoryFrames::with_name(&name, SegmentLayout::MangoHud);
        let entries = frames.entries();

        unsafe {
            libc::shm_unlink(c_name.as_ptr() as *const libc::c_char);
        }

        let entries = entries.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fps, 240.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_short_segment_is_rejected_for_layout() {
        let name = format!("/game-sense-test-short-{}", std::process::id());
        let c_name = publish_segment(&name, &[0u8; 8]);

        let mut frames = SharedMemoryFrames::with_name(&name, SegmentLayout::MangoHud);
        let result = frames.entries();

        unsafe {
            libc::shm_unlink(c_name.as_ptr() as *const libc::c_char);
        }

        assert!(matches!(result, Err(ShmError::InvalidData(_))));
    }
}
