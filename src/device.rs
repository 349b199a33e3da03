use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Camera, CaptureRuntime, Module};
use crate::frame::FrameLayout;
use crate::types::{
    CameraModel, ColorResolution, DepthResolution, DeviceDescriptor, SegmentationResolution,
    StreamKind, StreamResolution,
};
use crate::{BridgeError, Result};

/// List the cameras the runtime can see, supported or not.
pub fn list_devices(runtime: &dyn CaptureRuntime) -> Result<Vec<DeviceDescriptor>> {
    runtime.enumerate_devices()
}

/// Stand-in used when no supported camera is attached. Accepts every
/// configuration and never delivers a frame.
#[derive(Debug, Default)]
pub(crate) struct Disconnected;

impl Disconnected {
    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            name: String::new(),
            model: CameraModel::None,
            firmware: [0; 4],
            color_fov: (0.0, 0.0),
            depth_fov: (0.0, 0.0),
        }
    }
}

impl Camera for Disconnected {
    fn descriptor(&self) -> DeviceDescriptor {
        Self::descriptor()
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn is_stream_profile_valid(&self, _: &StreamResolution, _: &StreamResolution) -> bool {
        true
    }

    fn configure_stream(&mut self, _: StreamKind, _: &StreamResolution) -> Result<()> {
        Ok(())
    }

    fn enable_module(&mut self, _: Module) -> Result<()> {
        Ok(())
    }

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn acquire_frame(&mut self, timeout: Duration) -> Result<()> {
        std::thread::sleep(timeout);
        Err(BridgeError::DeviceNotFound)
    }

    fn release_frame(&mut self) {}

    fn close(&mut self) {}
}

/// The opened camera plus its stream configuration.
///
/// Device identification is read once at open. The camera object itself is
/// lent to the acquisition loop while it runs; stream configuration is
/// refused during that time.
pub struct DeviceSession {
    camera: Option<Box<dyn Camera>>,
    descriptor: DeviceDescriptor,
    color: Option<StreamResolution>,
    depth: Option<StreamResolution>,
    connected: Arc<AtomicBool>,
}

impl DeviceSession {
    /// Open the first supported camera the runtime reports.
    ///
    /// A runtime that cannot enumerate is fatal. No supported camera is not:
    /// the session is built around a disconnected stand-in so the rest of
    /// the bridge keeps working.
    pub fn open(runtime: &dyn CaptureRuntime) -> Result<DeviceSession> {
        let devices = runtime.enumerate_devices()?;

        let found = devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.model.is_supported());

        let camera: Box<dyn Camera> = match found {
            Some((index, desc)) => match runtime.open_device(index) {
                Ok(camera) => camera,
                Err(e) => {
                    log::warn!("Failed to open {}: {}", desc.name, e);
                    Box::new(Disconnected)
                }
            },
            None => {
                log::warn!(
                    "No supported camera among {} device(s); running without one",
                    devices.len()
                );
                Box::new(Disconnected)
            }
        };

        let descriptor = camera.descriptor();
        let connected = camera.is_connected();
        if connected {
            log::info!(
                "Opened {}: model={} firmware={}",
                descriptor.name,
                descriptor.model.label(),
                descriptor.firmware_string()
            );
        }

        Ok(DeviceSession {
            camera: Some(camera),
            descriptor,
            color: None,
            depth: None,
            connected: Arc::new(AtomicBool::new(connected)),
        })
    }

    /// Session without any camera.
    pub fn disconnected() -> DeviceSession {
        DeviceSession {
            camera: Some(Box::new(Disconnected)),
            descriptor: Disconnected::descriptor(),
            color: None,
            depth: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn camera_mut(&mut self) -> Result<&mut Box<dyn Camera>> {
        self.camera.as_mut().ok_or(BridgeError::CameraRunning)
    }

    /// Whether a color/depth pair can run together on this camera. Changes
    /// nothing.
    pub fn is_stream_combination_valid(
        &self,
        color: &StreamResolution,
        depth: &StreamResolution,
    ) -> bool {
        match &self.camera {
            Some(camera) => camera.is_stream_profile_valid(color, depth),
            None => false,
        }
    }

    fn apply(
        &mut self,
        color: Option<StreamResolution>,
        depth: Option<StreamResolution>,
    ) -> Result<()> {
        let camera = self.camera.as_ref().ok_or(BridgeError::CameraRunning)?;

        if let (Some(c), Some(d)) = (color.or(self.color), depth.or(self.depth)) {
            if !camera.is_stream_profile_valid(&c, &d) {
                log::warn!(
                    "Rejected stream combination color {} / depth {} on {}",
                    c,
                    d,
                    self.descriptor.model.label()
                );
                return Err(BridgeError::InvalidStreamCombination {
                    color: c.to_string(),
                    depth: d.to_string(),
                });
            }
        }

        let previous_color = self.color;
        let camera = self.camera_mut()?;
        if let Some(c) = color {
            camera.configure_stream(StreamKind::Color, &c)?;
        }
        if let Some(d) = depth {
            if let Err(e) = camera.configure_stream(StreamKind::Depth, &d) {
                // Put the color stream back so camera and buffers still agree.
                if let (Some(_), Some(prev)) = (color, previous_color) {
                    if let Err(rollback) = camera.configure_stream(StreamKind::Color, &prev) {
                        log::warn!("Failed to restore color stream {}: {}", prev, rollback);
                    }
                }
                return Err(e);
            }
        }
        if color.is_some() {
            self.color = color;
        }
        if depth.is_some() {
            self.depth = depth;
        }
        Ok(())
    }

    pub fn configure_color(&mut self, resolution: ColorResolution) -> Result<()> {
        self.apply(Some(resolution.value()), None)?;
        log::debug!("Color stream set to {}", resolution);
        Ok(())
    }

    pub fn configure_depth(&mut self, resolution: DepthResolution) -> Result<()> {
        self.apply(None, Some(resolution.value()))?;
        log::debug!("Depth stream set to {}", resolution);
        Ok(())
    }

    /// Set both streams from a segmentation mode.
    pub fn configure_segmentation(&mut self, resolution: SegmentationResolution) -> Result<()> {
        let (color, depth) = resolution.value();
        self.apply(Some(color), Some(depth))?;
        log::debug!("Segmentation streams set to {}", resolution.label());
        Ok(())
    }

    pub fn color_resolution(&self) -> Option<StreamResolution> {
        self.color
    }

    pub fn depth_resolution(&self) -> Option<StreamResolution> {
        self.depth
    }

    /// Frame buffer sizes implied by the configured streams. Unconfigured
    /// streams get empty buffers.
    pub fn layout(&self) -> FrameLayout {
        let mut layout = FrameLayout::default();
        if let Some(c) = &self.color {
            layout = layout.with_color(c);
        }
        if let Some(d) = &self.depth {
            layout = layout.with_depth(d);
        }
        layout
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn query_model(&self) -> CameraModel {
        self.descriptor.model
    }

    /// Firmware as `a.b.c.d`.
    pub fn query_firmware(&self) -> String {
        self.descriptor.firmware_string()
    }

    /// Horizontal and vertical field of view in degrees.
    pub fn query_field_of_view(&self, stream: StreamKind) -> (f32, f32) {
        match stream {
            StreamKind::Color => self.descriptor.color_fov,
            StreamKind::Depth => self.descriptor.depth_fov,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connection flag shared with the acquisition loop.
    pub(crate) fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub(crate) fn take_camera(&mut self) -> Option<Box<dyn Camera>> {
        self.camera.take()
    }

    pub(crate) fn restore_camera(&mut self, camera: Box<dyn Camera>) {
        self.connected.store(camera.is_connected(), Ordering::Release);
        self.camera = Some(camera);
    }

    /// Replace a camera that was lost with the stand-in.
    pub(crate) fn restore_disconnected(&mut self) {
        self.restore_camera(Box::new(Disconnected));
    }
}
