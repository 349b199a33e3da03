//! C FFI layer for sensebridge.
//!
//! Opaque handle-based API for engine plugins. The generated C header is
//! written to `include/sensebridge.h` by cbindgen.
//!
//! Buffer pointers returned here point into the session's foreground frame
//! and stay valid until the next `sb_refresh`, resolution change or
//! `sb_session_close` on any handle of the same session.

use std::ffi::{c_char, c_int, CStr};
use std::sync::{Arc, Mutex, OnceLock};

use crate::config::SessionConfig;
use crate::error::LastError;
use crate::session::{Session, SessionProvider};
use crate::sim::{SimulatedRuntime, SimulationConfig};
use crate::types::{
    ColorResolution, DepthResolution, Features, Hand, ScanFileFormat, ScanMode,
    SegmentationResolution,
};
use crate::BridgeError;

static LAST_ERROR: LastError = LastError::new();

static PROVIDER: OnceLock<SessionProvider> = OnceLock::new();

/// Opaque session handle for C consumers.
pub struct SbSession(Arc<Mutex<Session>>);

/// Head tracking result in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SbHead {
    /// Number of detected faces.
    pub count: u32,
    /// Head centre in millimetres.
    pub position: [f32; 3],
    /// Pitch, yaw, roll in degrees.
    pub rotation: [f32; 3],
}

/// Hand cursor in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SbCursor {
    pub valid: bool,
    pub position: [f32; 3],
}

fn provider() -> &'static SessionProvider {
    PROVIDER.get_or_init(SessionProvider::new)
}

/// Run `f` on the session behind `handle`, or return `default` when the
/// handle is null.
///
/// # Safety
/// `handle` must come from `sb_session_open` and not be closed, or be null.
unsafe fn with_session<R>(
    handle: *mut SbSession,
    default: R,
    f: impl FnOnce(&mut Session) -> R,
) -> R {
    if handle.is_null() {
        return default;
    }
    let session = &(*handle).0;
    let mut guard = session
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

fn report(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => {
            LAST_ERROR.clear();
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Open the shared session, or another handle on it if one is open.
///
/// With `simulated` set the session runs on the built-in simulated camera,
/// otherwise it runs without a camera. Configuration is read from the
/// `SENSEBRIDGE_*` environment variables. Returns NULL on error (check
/// `sb_last_error()`).
#[no_mangle]
pub extern "C" fn sb_session_open(simulated: bool) -> *mut SbSession {
    let opened = provider().get_or_open(|| {
        let config = SessionConfig::from_env();
        if simulated {
            Session::open(&SimulatedRuntime::new(SimulationConfig::default()), config)
        } else {
            Ok(Session::headless(config))
        }
    });
    match opened {
        Ok(session) => Box::into_raw(Box::new(SbSession(session))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Release a handle. The session stops once its last handle is closed.
///
/// # Safety
/// `handle` must come from `sb_session_open`, or be null.
#[no_mangle]
pub unsafe extern "C" fn sb_session_close(handle: *mut SbSession) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_enable_feature(handle: *mut SbSession, features: u32) {
    with_session(handle, (), |s| {
        s.enable_feature(Features::from_bits_truncate(features))
    })
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_disable_feature(handle: *mut SbSession, features: u32) {
    with_session(handle, (), |s| {
        s.disable_feature(Features::from_bits_truncate(features))
    })
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_is_feature_enabled(handle: *mut SbSession, features: u32) -> bool {
    with_session(handle, false, |s| {
        s.is_feature_enabled(Features::from_bits_truncate(features))
    })
}

fn resolution_index<T: Copy>(all: &[T], index: c_int) -> crate::Result<T> {
    usize::try_from(index)
        .ok()
        .and_then(|i| all.get(i).copied())
        .ok_or_else(|| BridgeError::StreamConfig(format!("no stream mode #{}", index)))
}

const SEGMENTATION_MODES: [SegmentationResolution; 5] = [
    SegmentationResolution::Color640x360,
    SegmentationResolution::Color960x540,
    SegmentationResolution::Color1280x720,
    SegmentationResolution::Color320x240,
    SegmentationResolution::Color640x480,
];

/// Select a color mode by its index in the resolution table. The camera
/// must be stopped. Returns 0 on success, -1 on error.
///
/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_set_color_resolution(handle: *mut SbSession, index: c_int) -> c_int {
    with_session(handle, -1, |s| {
        report(
            resolution_index(&ColorResolution::ALL, index)
                .and_then(|r| s.set_color_resolution(r)),
        )
    })
}

/// Select a depth mode by its index in the resolution table.
///
/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_set_depth_resolution(handle: *mut SbSession, index: c_int) -> c_int {
    with_session(handle, -1, |s| {
        report(
            resolution_index(&DepthResolution::ALL, index)
                .and_then(|r| s.set_depth_resolution(r)),
        )
    })
}

/// Select a segmentation color/depth pair by index.
///
/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_set_segmentation_resolution(
    handle: *mut SbSession,
    index: c_int,
) -> c_int {
    with_session(handle, -1, |s| {
        report(
            resolution_index(&SEGMENTATION_MODES, index)
                .and_then(|r| s.set_segmentation_resolution(r)),
        )
    })
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_start_camera(handle: *mut SbSession) -> c_int {
    with_session(handle, -1, |s| report(s.start_camera()))
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_stop_camera(handle: *mut SbSession) {
    with_session(handle, (), |s| s.stop_camera())
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_is_camera_running(handle: *mut SbSession) -> bool {
    with_session(handle, false, |s| s.is_camera_running())
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_is_camera_connected(handle: *mut SbSession) -> bool {
    with_session(handle, false, |s| s.is_camera_connected())
}

/// Pull the newest frame. Returns true if it changed.
///
/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_refresh(handle: *mut SbSession) -> bool {
    with_session(handle, false, |s| s.refresh())
}

unsafe fn write_len(out_len: *mut usize, len: usize) {
    if !out_len.is_null() {
        out_len.write(len);
    }
}

/// RGBA8 color image. `out_len` receives the length in bytes.
///
/// # Safety
/// `handle` must be a live session handle, or null. `out_len` must be
/// writable, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_color_buffer(handle: *mut SbSession, out_len: *mut usize) -> *const u8 {
    with_session(handle, std::ptr::null(), |s| {
        let buf = s.color_buffer();
        write_len(out_len, buf.len());
        buf.as_ptr()
    })
}

/// Depth image in millimetres. `out_len` receives the number of samples.
///
/// # Safety
/// `handle` must be a live session handle, or null. `out_len` must be
/// writable, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_depth_buffer(handle: *mut SbSession, out_len: *mut usize) -> *const u16 {
    with_session(handle, std::ptr::null(), |s| {
        let buf = s.depth_buffer();
        write_len(out_len, buf.len());
        buf.as_ptr()
    })
}

/// RGBA8 scan preview. Its size can change while scanning; `width` and
/// `height` receive the current one.
///
/// # Safety
/// `handle` must be a live session handle, or null. The out pointers must
/// be writable, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_scan_buffer(
    handle: *mut SbSession,
    width: *mut u32,
    height: *mut u32,
    out_len: *mut usize,
) -> *const u8 {
    with_session(handle, std::ptr::null(), |s| {
        let (w, h) = s.scan_size();
        if !width.is_null() {
            width.write(w);
        }
        if !height.is_null() {
            height.write(h);
        }
        let buf = s.scan_buffer();
        write_len(out_len, buf.len());
        buf.as_ptr()
    })
}

/// # Safety
/// `handle` must be a live session handle, or null. `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn sb_head(handle: *mut SbSession, out: *mut SbHead) -> bool {
    if out.is_null() {
        return false;
    }
    with_session(handle, false, |s| {
        out.write(SbHead {
            count: s.head_count(),
            position: s.head_position(),
            rotation: s.head_rotation(),
        });
        true
    })
}

/// `hand` is 0 for left, 1 for right.
///
/// # Safety
/// `handle` must be a live session handle, or null. `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn sb_cursor(handle: *mut SbSession, hand: c_int, out: *mut SbCursor) -> bool {
    let hand = match hand {
        0 => Hand::Left,
        1 => Hand::Right,
        _ => return false,
    };
    if out.is_null() {
        return false;
    }
    with_session(handle, false, |s| {
        let cursor = s.cursor_state(hand);
        out.write(SbCursor {
            valid: cursor.valid,
            position: cursor.position,
        });
        true
    })
}

/// `mode` is 0 for object, 1 for face.
///
/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_configure_scanning(
    handle: *mut SbSession,
    mode: c_int,
    solidify: bool,
    texture: bool,
) {
    let mode = if mode == 1 { ScanMode::Face } else { ScanMode::Object };
    with_session(handle, (), |s| s.configure_scanning(mode, solidify, texture))
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_set_scanning_volume(
    handle: *mut SbSession,
    x: f32,
    y: f32,
    z: f32,
    resolution: u32,
) {
    with_session(handle, (), |s| s.set_scanning_volume([x, y, z], resolution))
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_start_scanning(handle: *mut SbSession) {
    with_session(handle, (), |s| s.start_scanning())
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_stop_scanning(handle: *mut SbSession) {
    with_session(handle, (), |s| s.stop_scanning())
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_reset_scanning(handle: *mut SbSession) {
    with_session(handle, (), |s| s.reset_scanning())
}

/// Queue an OBJ reconstruction into `path` (UTF-8). Poll
/// `sb_has_scan_completed` for the result. Returns -1 for a bad path.
///
/// # Safety
/// `handle` must be a live session handle, or null. `path` must be a
/// NUL-terminated string, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_save_scan(handle: *mut SbSession, path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }
    let Ok(path) = CStr::from_ptr(path).to_str() else {
        return -1;
    };
    with_session(handle, -1, |s| {
        s.save_scan(ScanFileFormat::Obj, path);
        0
    })
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_is_scanning(handle: *mut SbSession) -> bool {
    with_session(handle, false, |s| s.is_scanning())
}

/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_has_scan_completed(handle: *mut SbSession) -> bool {
    with_session(handle, false, |s| s.has_scan_completed())
}

/// True once after the scan preview changed size.
///
/// # Safety
/// `handle` must be a live session handle, or null.
#[no_mangle]
pub unsafe extern "C" fn sb_has_scan_resolution_changed(handle: *mut SbSession) -> bool {
    with_session(handle, false, |s| s.has_scan_resolution_changed())
}

/// Last error message, or NULL. Valid until the next failing call.
#[no_mangle]
pub extern "C" fn sb_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    // One test: all handles share the process-wide session.
    #[test]
    fn simulated_session_round_trip() {
        unsafe {
            let a = sb_session_open(true);
            assert!(!a.is_null());
            let b = sb_session_open(true);
            assert!(Arc::ptr_eq(&(*a).0, &(*b).0));
            sb_session_close(b);

            assert_eq!(sb_set_color_resolution(a, 99), -1);
            assert!(!sb_last_error().is_null());
            assert_eq!(sb_set_color_resolution(a, 3), 0);
            assert_eq!(sb_set_depth_resolution(a, 1), 0);
            assert!(sb_last_error().is_null());

            sb_enable_feature(a, (Features::CAMERA_STREAMING | Features::HEAD_TRACKING).bits());
            assert!(sb_is_feature_enabled(a, Features::HEAD_TRACKING.bits()));
            assert_eq!(sb_start_camera(a), 0);
            assert!(sb_is_camera_running(a));

            let deadline = Instant::now() + Duration::from_secs(5);
            let mut head = SbHead::default();
            while Instant::now() < deadline {
                sb_refresh(a);
                if sb_head(a, &mut head) && head.count == 1 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(head.count, 1);

            let mut len = 0usize;
            assert!(!sb_color_buffer(a, &mut len).is_null());
            assert_eq!(len, 640 * 480 * 4);
            assert!(!sb_depth_buffer(a, &mut len).is_null());
            assert_eq!(len, 640 * 480);

            assert_eq!(sb_set_color_resolution(a, 0), -1);
            sb_stop_camera(a);
            assert!(!sb_is_camera_running(a));
            sb_session_close(a);
        }
    }
}
