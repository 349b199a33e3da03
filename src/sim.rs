//! Synthetic capture runtime.
//!
//! Produces deterministic color, depth, face, cursor, blob, segmentation and
//! scan data at a fixed frame rate without hardware. Used for headless runs
//! and throughout the test suite.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::backend::{
    AlertEvent, BlobExtremities, BlobOutput, BlobSample, Camera, CaptureRuntime, CursorOutput,
    CursorSample, FaceOutput, FacePose, GestureEvent, Module, RawImage,
};
use crate::mesh;
use crate::types::{
    AlertKind, BodySide, CameraModel, DeviceDescriptor, GestureKind, PixelFormat,
    ScanConfiguration, ScanFileFormat, ScanVolume, StreamKind, StreamResolution,
};
use crate::{BridgeError, Result};

/// Padding appended to every color row, to exercise pitch handling.
const ROW_PADDING: usize = 8;

/// Behaviour of one simulated camera.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub model: CameraModel,
    pub firmware: [u16; 4],
    /// Frame rate override. Defaults to the configured stream rate.
    pub frame_rate: Option<f32>,
    /// Fail every n-th acquisition.
    pub fail_every: Option<u64>,
    /// Report the device as lost after this many frames.
    pub disconnect_after: Option<u64>,
    pub face_present: bool,
    /// Preview size while idle.
    pub scan_preview_idle: (u32, u32),
    /// Preview size while scanning.
    pub scan_preview_scanning: (u32, u32),
    /// Time a reconstruction takes.
    pub reconstruct_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            model: CameraModel::F200,
            firmware: [2, 60, 0, 0],
            frame_rate: None,
            fail_every: None,
            disconnect_after: None,
            face_present: true,
            scan_preview_idle: (160, 120),
            scan_preview_scanning: (320, 240),
            reconstruct_delay: Duration::from_millis(5),
        }
    }
}

/// Runtime exposing a fixed list of simulated cameras.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRuntime {
    devices: Vec<SimulationConfig>,
    unavailable: bool,
}

impl SimulatedRuntime {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            devices: vec![config],
            unavailable: false,
        }
    }

    /// A runtime with no cameras attached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A runtime that cannot create an SDK session at all.
    pub fn unavailable() -> Self {
        Self {
            devices: Vec::new(),
            unavailable: true,
        }
    }

    pub fn with_device(mut self, config: SimulationConfig) -> Self {
        self.devices.push(config);
        self
    }
}

impl CaptureRuntime for SimulatedRuntime {
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        if self.unavailable {
            return Err(BridgeError::RuntimeUnavailable(
                "simulated runtime disabled".into(),
            ));
        }
        Ok(self.devices.iter().map(descriptor_for).collect())
    }

    fn open_device(&self, index: usize) -> Result<Box<dyn Camera>> {
        let config = self
            .devices
            .get(index)
            .ok_or(BridgeError::DeviceNotFound)?
            .clone();
        Ok(Box::new(SimulatedCamera::new(config)))
    }
}

fn descriptor_for(config: &SimulationConfig) -> DeviceDescriptor {
    let (color_fov, depth_fov) = match config.model {
        CameraModel::R200 => ((70.0, 43.0), (59.0, 46.0)),
        CameraModel::SR300 => ((68.0, 41.5), (71.5, 55.0)),
        _ => ((77.0, 43.0), (73.0, 59.0)),
    };
    DeviceDescriptor {
        name: format!("Simulated {}", config.model.label()),
        model: config.model,
        firmware: config.firmware,
        color_fov,
        depth_fov,
    }
}

/// One simulated camera and its middleware.
#[derive(Debug)]
pub struct SimulatedCamera {
    config: SimulationConfig,
    color: Option<StreamResolution>,
    depth: Option<StreamResolution>,
    modules: HashSet<Module>,
    initialized: bool,
    in_frame: bool,
    frame_index: u64,
    next_frame_at: Option<Instant>,
    cursor_announced: bool,
    color_raw: Vec<u8>,
    depth_raw: Vec<u8>,
    segmented_raw: Vec<u8>,
    scan_raw: Vec<u8>,
    scan_size: (u32, u32),
    scan_config: ScanConfiguration,
    scan_volume: Option<ScanVolume>,
    scanned_frames: u64,
    scanning_at_reconstruct: Option<bool>,
}

impl SimulatedCamera {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            color: None,
            depth: None,
            modules: HashSet::new(),
            initialized: false,
            in_frame: false,
            frame_index: 0,
            next_frame_at: None,
            cursor_announced: false,
            color_raw: Vec::new(),
            depth_raw: Vec::new(),
            segmented_raw: Vec::new(),
            scan_raw: Vec::new(),
            scan_size: (0, 0),
            scan_config: ScanConfiguration::default(),
            scan_volume: None,
            scanned_frames: 0,
            scanning_at_reconstruct: None,
        }
    }

    /// Whether scanning was on when the last reconstruction ran.
    pub fn scanning_at_reconstruct(&self) -> Option<bool> {
        self.scanning_at_reconstruct
    }

    fn lost(&self) -> bool {
        self.config
            .disconnect_after
            .is_some_and(|n| self.frame_index >= n)
    }

    fn frame_interval(&self) -> Duration {
        let fps = self
            .config
            .frame_rate
            .or(self.color.map(|c| c.fps))
            .or(self.depth.map(|d| d.fps))
            .unwrap_or(30.0)
            .max(1.0);
        Duration::from_secs_f32(1.0 / fps)
    }

    fn require(&self, module: Module) -> Result<()> {
        if !self.modules.contains(&module) {
            return Err(BridgeError::ModuleUnavailable(module));
        }
        Ok(())
    }

    fn phase(&self) -> f32 {
        self.frame_index as f32 * 0.05
    }

    fn render(&mut self) {
        let f = self.frame_index as usize;

        if let (true, Some(res)) = (self.modules.contains(&Module::Streams), self.color) {
            let (w, h) = (res.width as usize, res.height as usize);
            let pitch = w * 3 + ROW_PADDING;
            self.color_raw.resize(pitch * h, 0);
            for y in 0..h {
                let row = &mut self.color_raw[y * pitch..(y + 1) * pitch];
                for x in 0..w {
                    row[x * 3] = (x + f * 7) as u8;
                    row[x * 3 + 1] = (y * 3 + f) as u8;
                    row[x * 3 + 2] = (x + y + f * 13) as u8;
                }
            }
        }

        if let (true, Some(res)) = (self.modules.contains(&Module::Streams), self.depth) {
            let (w, h) = (res.width as usize, res.height as usize);
            self.depth_raw.resize(w * h * 2, 0);
            for y in 0..h {
                for x in 0..w {
                    let d = 400 + ((x + y + f) % 500) as u16;
                    let i = (y * w + x) * 2;
                    self.depth_raw[i..i + 2].copy_from_slice(&d.to_le_bytes());
                }
            }
        }

        if let (true, Some(res)) = (self.modules.contains(&Module::Segmentation), self.color) {
            let (w, h) = (res.width as usize, res.height as usize);
            self.segmented_raw.resize(w * h * 4, 0);
            let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
            for y in 0..h {
                for x in 0..w {
                    let dx = (x as f32 - cx) / cx.max(1.0);
                    let dy = (y as f32 - cy) / cy.max(1.0);
                    let inside = dx * dx + dy * dy < 0.25;
                    let i = (y * w + x) * 4;
                    let px = &mut self.segmented_raw[i..i + 4];
                    px[0] = (x + f) as u8;
                    px[1] = y as u8;
                    px[2] = 0x80;
                    px[3] = if inside { 0xFF } else { 0 };
                }
            }
        }

        if self.modules.contains(&Module::Scan3D) {
            if self.scan_config.start_scan {
                self.scanned_frames += 1;
            }
            self.scan_size = if self.scan_config.start_scan {
                self.config.scan_preview_scanning
            } else {
                self.config.scan_preview_idle
            };
            let (w, h) = (self.scan_size.0 as usize, self.scan_size.1 as usize);
            self.scan_raw.resize(w * h * 3, 0);
            let shade = (self.scanned_frames.min(255)) as u8;
            for px in self.scan_raw.chunks_exact_mut(3) {
                px[0] = shade;
                px[1] = (f % 256) as u8;
                px[2] = 0x40;
            }
        }
    }
}

impl Camera for SimulatedCamera {
    fn descriptor(&self) -> DeviceDescriptor {
        descriptor_for(&self.config)
    }

    fn is_connected(&self) -> bool {
        !self.lost()
    }

    fn is_stream_profile_valid(&self, color: &StreamResolution, depth: &StreamResolution) -> bool {
        let near_range = matches!(self.config.model, CameraModel::F200 | CameraModel::SR300);
        let depth_ok = if near_range {
            depth.width == 640 && depth.height == 480
        } else {
            depth.width != 640
        };
        // Full HD color saturates the bus beyond 30 fps depth.
        let bandwidth_ok = !(color.width >= 1920 && depth.fps > 30.0);
        depth_ok && bandwidth_ok
    }

    fn configure_stream(&mut self, kind: StreamKind, resolution: &StreamResolution) -> Result<()> {
        if self.initialized {
            return Err(BridgeError::StreamConfig(
                "pipeline already initialised".into(),
            ));
        }
        match kind {
            StreamKind::Color => self.color = Some(*resolution),
            StreamKind::Depth => self.depth = Some(*resolution),
        }
        Ok(())
    }

    fn enable_module(&mut self, module: Module) -> Result<()> {
        if self.lost() {
            return Err(BridgeError::DeviceLost);
        }
        self.modules.insert(module);
        Ok(())
    }

    fn init(&mut self) -> Result<()> {
        if self.lost() {
            return Err(BridgeError::DeviceLost);
        }
        self.initialized = true;
        self.next_frame_at = None;
        Ok(())
    }

    fn acquire_frame(&mut self, timeout: Duration) -> Result<()> {
        if self.lost() {
            std::thread::sleep(timeout);
            return Err(BridgeError::DeviceLost);
        }
        if !self.initialized {
            return Err(BridgeError::Acquire("pipeline not initialised".into()));
        }

        let now = Instant::now();
        let deadline = self.next_frame_at.unwrap_or(now);
        if deadline > now {
            let wait = deadline - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(BridgeError::Timeout);
            }
            std::thread::sleep(wait);
        }
        self.next_frame_at = Some(deadline.max(now) + self.frame_interval());

        self.frame_index += 1;
        if let Some(n) = self.config.fail_every {
            if n > 0 && self.frame_index % n == 0 {
                return Err(BridgeError::Acquire(format!(
                    "simulated failure at frame {}",
                    self.frame_index
                )));
            }
        }

        self.render();
        self.in_frame = true;
        Ok(())
    }

    fn release_frame(&mut self) {
        self.in_frame = false;
    }

    fn close(&mut self) {
        self.modules.clear();
        self.initialized = false;
        self.in_frame = false;
        self.next_frame_at = None;
        self.cursor_announced = false;
        self.scan_config = ScanConfiguration::default();
    }

    fn query_color_sample(&mut self) -> Option<RawImage<'_>> {
        let res = self.color?;
        if !self.in_frame || !self.modules.contains(&Module::Streams) {
            return None;
        }
        Some(RawImage {
            width: res.width,
            height: res.height,
            pitch: res.width as usize * 3 + ROW_PADDING,
            format: PixelFormat::Rgb24,
            data: &self.color_raw,
        })
    }

    fn query_depth_sample(&mut self) -> Option<RawImage<'_>> {
        let res = self.depth?;
        if !self.in_frame || !self.modules.contains(&Module::Streams) {
            return None;
        }
        Some(RawImage {
            width: res.width,
            height: res.height,
            pitch: res.width as usize * 2,
            format: PixelFormat::Depth16,
            data: &self.depth_raw,
        })
    }

    fn query_face_output(&mut self) -> Result<FaceOutput> {
        self.require(Module::Face)?;
        if !self.in_frame {
            return Err(BridgeError::DataUnavailable("face"));
        }
        if !self.config.face_present {
            return Ok(FaceOutput::default());
        }
        let t = self.phase();
        Ok(FaceOutput {
            faces: vec![FacePose {
                position: Some([t.sin() * 100.0, t.cos() * 50.0, 600.0]),
                rotation: Some([0.0, t.sin() * 20.0, 0.0]),
            }],
        })
    }

    fn query_cursor_output(&mut self) -> Result<CursorOutput> {
        self.require(Module::HandCursor)?;
        if !self.in_frame {
            return Err(BridgeError::DataUnavailable("cursor"));
        }
        let t = self.phase();
        let mut output = CursorOutput {
            cursors: vec![CursorSample {
                side: BodySide::Right,
                position: [t.sin() * 0.1, 0.2, 0.4],
            }],
            ..Default::default()
        };
        if !self.cursor_announced {
            self.cursor_announced = true;
            output.alerts.push(AlertEvent {
                kind: AlertKind::CursorDetected,
                side: BodySide::Right,
            });
        }
        if self.frame_index % 30 == 0 {
            output.gestures.push(GestureEvent {
                kind: GestureKind::Click,
                side: BodySide::Right,
            });
        }
        Ok(output)
    }

    fn query_segmented_image(&mut self) -> Option<RawImage<'_>> {
        let res = self.color?;
        if !self.in_frame || !self.modules.contains(&Module::Segmentation) {
            return None;
        }
        Some(RawImage {
            width: res.width,
            height: res.height,
            pitch: res.width as usize * 4,
            format: PixelFormat::Rgba8,
            data: &self.segmented_raw,
        })
    }

    fn query_blob_output(&mut self) -> Result<BlobOutput> {
        self.require(Module::Blob)?;
        if !self.in_frame {
            return Err(BridgeError::DataUnavailable("blob"));
        }
        let c = [0.0, 0.0, 500.0];
        Ok(BlobOutput {
            blobs: vec![BlobSample {
                pixel_count: 1200,
                extremities: BlobExtremities {
                    center: c,
                    closest: [0.0, 0.0, 450.0],
                    top: [0.0, 80.0, 500.0],
                    bottom: [0.0, -80.0, 500.0],
                    left: [-60.0, 0.0, 500.0],
                    right: [60.0, 0.0, 500.0],
                },
            }],
        })
    }

    fn query_scan_preview(&mut self) -> Option<RawImage<'_>> {
        if !self.in_frame || !self.modules.contains(&Module::Scan3D) {
            return None;
        }
        Some(RawImage {
            width: self.scan_size.0,
            height: self.scan_size.1,
            pitch: self.scan_size.0 as usize * 3,
            format: PixelFormat::Rgb24,
            data: &self.scan_raw,
        })
    }

    fn scan_configuration(&self) -> ScanConfiguration {
        self.scan_config
    }

    fn set_scan_configuration(&mut self, config: ScanConfiguration) -> Result<()> {
        self.require(Module::Scan3D)?;
        self.scan_config = config;
        Ok(())
    }

    fn set_scan_area(&mut self, volume: ScanVolume) -> Result<()> {
        self.require(Module::Scan3D)?;
        self.scan_volume = Some(volume);
        Ok(())
    }

    fn reset_scan(&mut self) -> Result<()> {
        self.require(Module::Scan3D)?;
        self.scanned_frames = 0;
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.modules.contains(&Module::Scan3D) && self.scan_config.start_scan
    }

    fn reconstruct(&mut self, format: ScanFileFormat, path: &Path) -> Result<()> {
        self.require(Module::Scan3D)?;
        self.scanning_at_reconstruct = Some(self.scan_config.start_scan);
        std::thread::sleep(self.config.reconstruct_delay);

        let mut result = mesh::tetrahedron();
        if let Some(volume) = self.scan_volume {
            for v in &mut result.vertices {
                for (c, extent) in v.iter_mut().zip(volume.bounding_box) {
                    *c *= extent;
                }
            }
        }
        match format {
            ScanFileFormat::Obj => mesh::save_obj(&result, path)
                .map_err(|e| BridgeError::Reconstruct(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorResolution, DepthResolution};

    fn streaming_camera(config: SimulationConfig) -> SimulatedCamera {
        let mut cam = SimulatedCamera::new(config);
        cam.configure_stream(StreamKind::Color, &ColorResolution::Res320x240x30.value())
            .unwrap();
        cam.configure_stream(StreamKind::Depth, &DepthResolution::Res640x480x30.value())
            .unwrap();
        cam.enable_module(Module::Streams).unwrap();
        cam.init().unwrap();
        cam
    }

    #[test]
    fn samples_only_exist_inside_a_frame() {
        let mut cam = streaming_camera(SimulationConfig {
            frame_rate: Some(1000.0),
            ..Default::default()
        });
        assert!(cam.query_color_sample().is_none());
        cam.acquire_frame(Duration::from_millis(100)).unwrap();
        let color = cam.query_color_sample().unwrap();
        assert_eq!((color.width, color.height), (320, 240));
        assert!(color.data.len() >= color.required_len());
        cam.release_frame();
        assert!(cam.query_depth_sample().is_none());
    }

    #[test]
    fn slow_frames_time_out() {
        let mut cam = streaming_camera(SimulationConfig {
            frame_rate: Some(1.0),
            ..Default::default()
        });
        cam.acquire_frame(Duration::from_millis(10)).unwrap();
        cam.release_frame();
        assert!(matches!(
            cam.acquire_frame(Duration::from_millis(10)),
            Err(BridgeError::Timeout)
        ));
    }

    #[test]
    fn injected_failures_and_disconnect() {
        let mut cam = streaming_camera(SimulationConfig {
            frame_rate: Some(1000.0),
            fail_every: Some(2),
            disconnect_after: Some(3),
            ..Default::default()
        });
        let t = Duration::from_millis(50);
        assert!(cam.acquire_frame(t).is_ok());
        assert!(matches!(cam.acquire_frame(t), Err(BridgeError::Acquire(_))));
        assert!(cam.acquire_frame(t).is_ok());
        assert!(!cam.is_connected());
        assert!(matches!(
            cam.acquire_frame(Duration::from_millis(1)),
            Err(BridgeError::DeviceLost)
        ));
    }

    #[test]
    fn near_range_cameras_need_vga_depth() {
        let cam = SimulatedCamera::new(SimulationConfig::default());
        let color = ColorResolution::Res640x480x30.value();
        assert!(cam.is_stream_profile_valid(&color, &DepthResolution::Res640x480x30.value()));
        assert!(!cam.is_stream_profile_valid(&color, &DepthResolution::Res480x360x30.value()));

        let r200 = SimulatedCamera::new(SimulationConfig {
            model: CameraModel::R200,
            ..Default::default()
        });
        assert!(r200.is_stream_profile_valid(&color, &DepthResolution::Res480x360x30.value()));
        assert!(!r200.is_stream_profile_valid(
            &ColorResolution::Res1920x1080x30.value(),
            &DepthResolution::Res480x360x60.value()
        ));
    }

    #[test]
    fn scan_requires_module() {
        let mut cam = SimulatedCamera::new(SimulationConfig::default());
        assert!(matches!(
            cam.set_scan_configuration(ScanConfiguration::default()),
            Err(BridgeError::ModuleUnavailable(Module::Scan3D))
        ));
        cam.enable_module(Module::Scan3D).unwrap();
        cam.set_scan_configuration(ScanConfiguration {
            start_scan: true,
            ..Default::default()
        })
        .unwrap();
        assert!(cam.is_scanning());
    }

    #[test]
    fn unavailable_runtime_fails_enumeration() {
        assert!(matches!(
            SimulatedRuntime::unavailable().enumerate_devices(),
            Err(BridgeError::RuntimeUnavailable(_))
        ));
        assert!(SimulatedRuntime::empty().enumerate_devices().unwrap().is_empty());
    }
}
