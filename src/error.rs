use std::fmt;

use crate::backend::Module;

/// Errors produced by the bridge, its device boundary and mesh I/O.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Capture runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("No compatible camera found")]
    DeviceNotFound,

    #[error("Camera lost")]
    DeviceLost,

    #[error("Timeout waiting for frame")]
    Timeout,

    #[error("Frame acquisition failed: {0}")]
    Acquire(String),

    #[error("Camera is running; stop it before reconfiguring streams")]
    CameraRunning,

    #[error("Unsupported stream combination: color {color}, depth {depth}")]
    InvalidStreamCombination { color: String, depth: String },

    #[error("Stream configuration rejected: {0}")]
    StreamConfig(String),

    #[error("Middleware module {0:?} is not enabled")]
    ModuleUnavailable(Module),

    #[error("{0} data not ready")]
    DataUnavailable(&'static str),

    #[error("Sample is {actual_width}x{actual_height}, buffer expects {expected_width}x{expected_height}")]
    SampleMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Reconstruction failed: {0}")]
    Reconstruct(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OBJ parse error on line {line}: {message}")]
    MeshParse { line: usize, message: String },

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(String),

    #[error("Acquisition thread panicked")]
    WorkerPanicked,
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &BridgeError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_is_nul_terminated() {
        let slot = LastError::new();
        assert!(slot.as_ptr().is_null());

        slot.set(&BridgeError::DeviceNotFound);
        let msg = unsafe { std::ffi::CStr::from_ptr(slot.as_ptr()) };
        assert_eq!(msg.to_str().unwrap(), "No compatible camera found");

        slot.clear();
        assert!(slot.as_ptr().is_null());
    }
}
