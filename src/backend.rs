//! Boundary to the vendor capture runtime and its middleware modules.
//!
//! A [`CaptureRuntime`] enumerates and opens cameras; a [`Camera`] is one
//! opened device together with its middleware pipeline. The acquisition loop
//! drives a camera through `acquire_frame` / `query_*` / `release_frame`
//! once per cycle. Everything returned by a `query_*` call borrows from the
//! camera and is only valid until the next call that mutates it.

use std::path::Path;
use std::time::Duration;

use crate::types::{
    AlertKind, BodySide, DeviceDescriptor, GestureKind, PixelFormat, ScanConfiguration,
    ScanFileFormat, ScanVolume, StreamKind, StreamResolution,
};
use crate::{BridgeError, Result};

/// Middleware modules layered on top of raw capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    /// Raw color and depth streams.
    Streams,
    Face,
    Scan3D,
    HandCursor,
    Segmentation,
    Blob,
}

/// Borrowed view of an image produced by the device.
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of two consecutive rows.
    pub pitch: usize,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl RawImage<'_> {
    /// Bytes needed to hold all rows at the declared pitch.
    pub fn required_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        self.pitch * (self.height as usize - 1)
            + self.width as usize * self.format.bytes_per_pixel()
    }
}

/// Pose of one detected face.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FacePose {
    /// Head centre in camera space (millimetres), if the pose was solved.
    pub position: Option<[f32; 3]>,
    /// Pitch, yaw and roll in degrees, if the pose was solved.
    pub rotation: Option<[f32; 3]>,
}

/// Face module output for the current frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceOutput {
    pub faces: Vec<FacePose>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorSample {
    pub side: BodySide,
    pub position: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureEvent {
    pub kind: GestureKind,
    pub side: BodySide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub side: BodySide,
}

/// Hand cursor module output for the current frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOutput {
    pub cursors: Vec<CursorSample>,
    pub gestures: Vec<GestureEvent>,
    pub alerts: Vec<AlertEvent>,
}

/// Extremity points of a tracked blob, in camera space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlobExtremities {
    pub center: [f32; 3],
    pub closest: [f32; 3],
    pub top: [f32; 3],
    pub bottom: [f32; 3],
    pub left: [f32; 3],
    pub right: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlobSample {
    pub pixel_count: u32,
    pub extremities: BlobExtremities,
}

/// Blob module output, ordered largest to smallest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobOutput {
    pub blobs: Vec<BlobSample>,
}

/// Entry point of a capture SDK: finds and opens cameras.
pub trait CaptureRuntime {
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open the device at `index` in the enumeration order.
    fn open_device(&self, index: usize) -> Result<Box<dyn Camera>>;
}

/// An opened camera and its middleware pipeline.
///
/// Middleware queries default to "module not available" so a backend only
/// implements what its hardware offers.
pub trait Camera: Send {
    fn descriptor(&self) -> DeviceDescriptor;

    fn is_connected(&self) -> bool;

    /// Whether the two stream profiles can run together. Must not change
    /// any device state.
    fn is_stream_profile_valid(&self, color: &StreamResolution, depth: &StreamResolution) -> bool;

    fn configure_stream(&mut self, kind: StreamKind, resolution: &StreamResolution) -> Result<()>;

    fn enable_module(&mut self, module: Module) -> Result<()>;

    /// Bring the pipeline up with the enabled streams and modules.
    fn init(&mut self) -> Result<()>;

    /// Wait for the next frame. Returns [`BridgeError::Timeout`] when no frame
    /// arrived within `timeout`.
    fn acquire_frame(&mut self, timeout: Duration) -> Result<()>;

    fn release_frame(&mut self);

    /// Tear the pipeline down. Enabled modules are forgotten.
    fn close(&mut self);

    fn query_color_sample(&mut self) -> Option<RawImage<'_>> {
        None
    }

    fn query_depth_sample(&mut self) -> Option<RawImage<'_>> {
        None
    }

    fn query_face_output(&mut self) -> Result<FaceOutput> {
        Err(BridgeError::ModuleUnavailable(Module::Face))
    }

    fn query_cursor_output(&mut self) -> Result<CursorOutput> {
        Err(BridgeError::ModuleUnavailable(Module::HandCursor))
    }

    fn query_segmented_image(&mut self) -> Option<RawImage<'_>> {
        None
    }

    fn query_blob_output(&mut self) -> Result<BlobOutput> {
        Err(BridgeError::ModuleUnavailable(Module::Blob))
    }

    fn query_scan_preview(&mut self) -> Option<RawImage<'_>> {
        None
    }

    fn scan_configuration(&self) -> ScanConfiguration {
        ScanConfiguration::default()
    }

    fn set_scan_configuration(&mut self, _config: ScanConfiguration) -> Result<()> {
        Err(BridgeError::ModuleUnavailable(Module::Scan3D))
    }

    fn set_scan_area(&mut self, _volume: ScanVolume) -> Result<()> {
        Err(BridgeError::ModuleUnavailable(Module::Scan3D))
    }

    fn reset_scan(&mut self) -> Result<()> {
        Err(BridgeError::ModuleUnavailable(Module::Scan3D))
    }

    fn is_scanning(&self) -> bool {
        false
    }

    /// Reconstruct the accumulated volume into a mesh file. Blocks until the
    /// file is written.
    fn reconstruct(&mut self, _format: ScanFileFormat, _path: &Path) -> Result<()> {
        Err(BridgeError::ModuleUnavailable(Module::Scan3D))
    }
}
