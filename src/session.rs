//! Consumer-facing session.
//!
//! A [`Session`] owns the device, the consumer half of the frame triad and
//! the acquisition thread. Everything here is called from the consumer
//! thread; the acquisition thread only sees the shared atomics, the scan
//! controller and the parts lent to it while running.

use std::path::Path;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex, Weak};

use crate::acquisition::{load_state, AcquisitionLoop, LoopContext, LoopParts, LoopState, LoopStats};
use crate::backend::{AlertEvent, CaptureRuntime};
use crate::config::SessionConfig;
use crate::device::DeviceSession;
use crate::extract::{default_extractors, Extractor};
use crate::features::FeatureRegistry;
use crate::frame::{BlobState, CursorState, DataFrame, FrameLayout, GestureState};
use crate::scan::{SaveOutcome, ScanController};
use crate::triad::{self, BackBuffer, FrontBuffer};
use crate::types::{
    CameraModel, ColorResolution, DepthResolution, Features, GestureKind, Hand, ScanFileFormat,
    ScanMode, SegmentationResolution, StreamKind,
};
use crate::{BridgeError, Result};

/// Producer-side parts held by the session while the camera is stopped.
struct Idle {
    back: BackBuffer,
    extractors: Vec<Box<dyn Extractor>>,
}

pub struct Session {
    config: SessionConfig,
    device: DeviceSession,
    features: Arc<FeatureRegistry>,
    scan: Arc<ScanController>,
    stats: Arc<LoopStats>,
    state: Arc<AtomicU8>,
    front: FrontBuffer,
    idle: Option<Idle>,
    worker: Option<AcquisitionLoop>,
}

impl Session {
    /// Open the first supported camera and apply the configured streams.
    ///
    /// Only a runtime that cannot enumerate devices is an error. Without a
    /// camera the session runs in a degraded mode where no frames arrive.
    pub fn open(runtime: &dyn CaptureRuntime, config: SessionConfig) -> Result<Session> {
        let device = DeviceSession::open(runtime)?;
        Ok(Self::with_device(device, config))
    }

    /// Session that never has a camera.
    pub fn headless(config: SessionConfig) -> Session {
        Self::with_device(DeviceSession::disconnected(), config)
    }

    fn with_device(mut device: DeviceSession, config: SessionConfig) -> Session {
        if let Some(color) = config.color {
            if let Err(e) = device.configure_color(color) {
                log::warn!("Initial color stream {} rejected: {}", color, e);
            }
        }
        if let Some(depth) = config.depth {
            if let Err(e) = device.configure_depth(depth) {
                log::warn!("Initial depth stream {} rejected: {}", depth, e);
            }
        }

        let scan = Arc::new(ScanController::new());
        let (back, front) = triad::triad(&device.layout());

        Session {
            features: Arc::new(FeatureRegistry::new(config.features)),
            stats: Arc::new(LoopStats::default()),
            state: Arc::new(AtomicU8::new(LoopState::Stopped as u8)),
            idle: Some(Idle {
                back,
                extractors: default_extractors(scan.clone()),
            }),
            scan,
            front,
            worker: None,
            device,
            config,
        }
    }

    // Camera lifecycle.

    /// Start the acquisition thread. Does nothing if it already runs.
    pub fn start_camera(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(idle) = self.idle.take() else {
            return Err(BridgeError::CameraRunning);
        };
        let Some(camera) = self.device.take_camera() else {
            self.idle = Some(idle);
            return Err(BridgeError::CameraRunning);
        };

        let parts = LoopParts {
            camera,
            back: idle.back,
            extractors: idle.extractors,
        };
        let ctx = LoopContext {
            features: self.features.clone(),
            scan: self.scan.clone(),
            connected: self.device.connected_flag(),
            stats: self.stats.clone(),
            state: self.state.clone(),
            acquire_timeout: self.config.acquire_timeout,
            retry_backoff: self.config.retry_backoff,
        };

        match AcquisitionLoop::start(parts, ctx, &self.config.thread_name) {
            Ok(worker) => {
                self.worker = Some(worker);
                log::info!("Camera started");
                Ok(())
            }
            Err((e, Some(parts))) => {
                self.restore(parts);
                Err(e)
            }
            Err((e, None)) => {
                self.rebuild_after_loss();
                Err(e)
            }
        }
    }

    /// Stop the acquisition thread and take the camera back. Does nothing if
    /// the camera is stopped. Enabled features are kept.
    pub fn stop_camera(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.stop() {
            Ok(parts) => {
                self.restore(parts);
                log::info!("Camera stopped");
            }
            Err(e) => {
                log::error!("Acquisition thread did not return cleanly: {}", e);
                self.rebuild_after_loss();
            }
        }
    }

    fn restore(&mut self, parts: LoopParts) {
        self.device.restore_camera(parts.camera);
        self.idle = Some(Idle {
            back: parts.back,
            extractors: parts.extractors,
        });
    }

    /// The camera and back buffer died with the thread. Continue without a
    /// camera on a fresh triad.
    fn rebuild_after_loss(&mut self) {
        self.device.restore_disconnected();
        let (back, front) = triad::triad(&self.layout());
        self.front = front;
        self.idle = Some(Idle {
            back,
            extractors: default_extractors(self.scan.clone()),
        });
    }

    pub fn is_camera_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_camera_connected(&self) -> bool {
        self.device.is_connected()
    }

    pub fn loop_state(&self) -> LoopState {
        load_state(&self.state)
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    // Features.

    pub fn enable_feature(&self, features: Features) {
        self.features.enable(features);
    }

    pub fn disable_feature(&self, features: Features) {
        self.features.disable(features);
    }

    pub fn is_feature_enabled(&self, features: Features) -> bool {
        self.features.is_enabled(features)
    }

    pub fn features(&self) -> Features {
        self.features.snapshot()
    }

    // Stream configuration. Only while stopped.

    fn layout(&self) -> FrameLayout {
        FrameLayout {
            scan: self.scan.preview_size(),
            ..self.device.layout()
        }
    }

    fn resize_buffers(&mut self) -> Result<()> {
        let layout = self.layout();
        let idle = self.idle.as_mut().ok_or(BridgeError::CameraRunning)?;
        triad::resize(&mut idle.back, &mut self.front, &layout);
        Ok(())
    }

    pub fn set_color_resolution(&mut self, resolution: ColorResolution) -> Result<()> {
        self.device.configure_color(resolution)?;
        self.resize_buffers()
    }

    pub fn set_depth_resolution(&mut self, resolution: DepthResolution) -> Result<()> {
        self.device.configure_depth(resolution)?;
        self.resize_buffers()
    }

    pub fn set_segmentation_resolution(&mut self, resolution: SegmentationResolution) -> Result<()> {
        self.device.configure_segmentation(resolution)?;
        self.resize_buffers()
    }

    // Device queries.

    pub fn device(&self) -> &DeviceSession {
        &self.device
    }

    pub fn query_model(&self) -> CameraModel {
        self.device.query_model()
    }

    pub fn query_firmware(&self) -> String {
        self.device.query_firmware()
    }

    pub fn query_field_of_view(&self, stream: StreamKind) -> (f32, f32) {
        self.device.query_field_of_view(stream)
    }

    // Frame access.

    /// Pull the newest published frame. Returns true if it changed.
    pub fn refresh(&mut self) -> bool {
        self.front.refresh()
    }

    /// Frame from the last successful [`refresh`](Self::refresh).
    pub fn frame(&self) -> &DataFrame {
        self.front.frame()
    }

    pub fn sequence_number(&self) -> u64 {
        self.front.sequence_number()
    }

    /// RGBA8 color image.
    pub fn color_buffer(&self) -> &[u8] {
        self.frame().color_image.as_slice()
    }

    /// Depth in millimetres.
    pub fn depth_buffer(&self) -> &[u16] {
        self.frame().depth_image.as_slice()
    }

    /// RGBA8 scan preview. Its size follows the scanning middleware; see
    /// [`scan_size`](Self::scan_size).
    pub fn scan_buffer(&self) -> &[u8] {
        self.frame().scan_preview.as_slice()
    }

    pub fn scan_size(&self) -> (u32, u32) {
        self.frame().scan_preview.dimensions()
    }

    /// RGBA8 color image with the user mask in alpha.
    pub fn segmentation_buffer(&self) -> &[u8] {
        self.frame().segmented_image.as_slice()
    }

    pub fn head_count(&self) -> u32 {
        self.frame().head.count
    }

    pub fn head_position(&self) -> [f32; 3] {
        self.frame().head.position
    }

    pub fn head_rotation(&self) -> [f32; 3] {
        self.frame().head.rotation
    }

    pub fn cursor_state(&self, hand: Hand) -> CursorState {
        self.frame().cursor(hand)
    }

    pub fn gesture(&self, kind: GestureKind) -> GestureState {
        self.frame().gesture(kind)
    }

    pub fn alerts(&self) -> &[AlertEvent] {
        &self.frame().alerts
    }

    pub fn blobs(&self) -> BlobState {
        self.frame().blobs
    }

    // Scanning.

    pub fn configure_scanning(&self, mode: ScanMode, solidify: bool, texture: bool) {
        self.scan.configure(mode, solidify, texture);
    }

    pub fn set_scanning_volume(&self, bounding_box: [f32; 3], resolution: u32) {
        self.scan.set_volume(bounding_box, resolution);
    }

    pub fn start_scanning(&self) {
        self.scan.start();
    }

    pub fn stop_scanning(&self) {
        self.scan.stop();
    }

    pub fn reset_scanning(&self) {
        self.scan.reset();
    }

    /// Reconstruct the scan into `path`. Poll
    /// [`has_scan_completed`](Self::has_scan_completed) for the result.
    pub fn save_scan(&self, format: ScanFileFormat, path: impl AsRef<Path>) {
        self.scan.save(format, path);
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    pub fn has_scan_completed(&self) -> bool {
        self.scan.has_completed()
    }

    /// True once after the scan preview changed size.
    pub fn has_scan_resolution_changed(&self) -> bool {
        self.scan.take_resolution_changed()
    }

    pub fn last_save_outcome(&self) -> Option<SaveOutcome> {
        self.scan.last_save_outcome()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_camera();
    }
}

/// Hands out one shared session at a time.
///
/// The provider only keeps a weak reference: the session closes when the
/// last handle is dropped and the next request opens a new one.
#[derive(Default)]
pub struct SessionProvider {
    current: Mutex<Weak<Mutex<Session>>>,
}

impl SessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<Arc<Mutex<Session>>> {
        self.current.lock().ok().and_then(|weak| weak.upgrade())
    }

    /// Return the live session or open one with `open`.
    pub fn get_or_open(
        &self,
        open: impl FnOnce() -> Result<Session>,
    ) -> Result<Arc<Mutex<Session>>> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(session) = current.upgrade() {
            return Ok(session);
        }
        let session = Arc::new(Mutex::new(open()?));
        *current = Arc::downgrade(&session);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedRuntime, SimulationConfig};
    use std::time::{Duration, Instant};

    fn runtime() -> SimulatedRuntime {
        SimulatedRuntime::new(SimulationConfig {
            frame_rate: Some(200.0),
            ..Default::default()
        })
    }

    fn config(features: Features) -> SessionConfig {
        SessionConfig {
            acquire_timeout: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(1),
            features,
            color: Some(ColorResolution::Res640x480x30),
            depth: Some(DepthResolution::Res640x480x30),
            ..Default::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn streaming_fills_buffers() {
        let mut session = Session::open(&runtime(), config(Features::CAMERA_STREAMING)).unwrap();
        session.start_camera().unwrap();
        assert!(session.is_camera_connected());
        assert!(wait_for(|| session.refresh()));

        assert_eq!(session.color_buffer().len(), 640 * 480 * 4);
        assert_eq!(session.depth_buffer().len(), 640 * 480);
        assert!(session.color_buffer().chunks(4).all(|px| px[3] == 0xFF));
        assert!(session.depth_buffer().iter().any(|&d| d > 0));

        let mut last = session.sequence_number();
        for _ in 0..20 {
            session.refresh();
            assert!(session.sequence_number() >= last);
            last = session.sequence_number();
        }
        session.stop_camera();
        assert!(session.stats().published() >= 1);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut session = Session::open(&runtime(), config(Features::CAMERA_STREAMING)).unwrap();
        session.stop_camera();
        session.start_camera().unwrap();
        session.start_camera().unwrap();
        assert!(session.is_camera_running());
        session.stop_camera();
        session.stop_camera();
        assert!(!session.is_camera_running());
        assert_eq!(session.loop_state(), LoopState::Stopped);

        session.start_camera().unwrap();
        assert!(wait_for(|| session.refresh()));
    }

    #[test]
    fn stopping_keeps_features() {
        let mut session = Session::open(
            &runtime(),
            config(Features::CAMERA_STREAMING | Features::HEAD_TRACKING),
        )
        .unwrap();
        session.start_camera().unwrap();
        session.stop_camera();
        assert_eq!(
            session.features(),
            Features::CAMERA_STREAMING | Features::HEAD_TRACKING
        );

        session.start_camera().unwrap();
        assert!(wait_for(|| {
            session.refresh();
            session.head_count() == 1
        }));
    }

    #[test]
    fn save_scan_completes_while_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.obj");
        let mut session =
            Session::open(&runtime(), config(Features::CAMERA_STREAMING | Features::SCAN_3D))
                .unwrap();
        session.configure_scanning(ScanMode::Face, false, true);
        session.start_camera().unwrap();
        session.start_scanning();

        assert!(wait_for(|| session.is_scanning()));
        assert!(wait_for(|| {
            session.refresh();
            session.scan_size() == (320, 240)
        }));
        assert_eq!(session.scan_buffer().len(), 320 * 240 * 4);
        assert!(session.has_scan_resolution_changed());

        session.save_scan(ScanFileFormat::Obj, &path);
        assert!(wait_for(|| session.has_scan_completed()));
        assert!(session.is_scanning());
        assert_eq!(session.last_save_outcome(), Some(SaveOutcome::Saved(path.clone())));
        assert!(path.exists());

        session.start_scanning();
        assert!(!session.has_scan_completed());
        session.stop_scanning();
        assert!(wait_for(|| !session.is_scanning()));
    }

    #[test]
    fn save_right_after_start_keeps_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quick.obj");
        let mut session =
            Session::open(&runtime(), config(Features::CAMERA_STREAMING | Features::SCAN_3D))
                .unwrap();
        session.start_camera().unwrap();
        session.start_scanning();
        session.save_scan(ScanFileFormat::Obj, &path);

        assert!(wait_for(|| session.has_scan_completed()));
        assert!(session.is_scanning());
        assert!(path.exists());
    }

    #[test]
    fn runs_without_a_camera() {
        let mut session =
            Session::open(&SimulatedRuntime::empty(), config(Features::CAMERA_STREAMING)).unwrap();
        assert_eq!(session.query_model(), CameraModel::None);
        session.start_camera().unwrap();
        assert!(wait_for(|| session.stats().failed_acquires() >= 1));
        assert!(!session.refresh());
        assert!(!session.is_camera_connected());

        let started = Instant::now();
        session.stop_camera();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn unavailable_runtime_fails_to_open() {
        assert!(matches!(
            Session::open(&SimulatedRuntime::unavailable(), SessionConfig::default()),
            Err(BridgeError::RuntimeUnavailable(_))
        ));
    }

    #[test]
    fn resolution_changes_require_a_stopped_camera() {
        let mut session = Session::open(&runtime(), config(Features::CAMERA_STREAMING)).unwrap();
        session.start_camera().unwrap();
        assert!(matches!(
            session.set_color_resolution(ColorResolution::Res320x240x30),
            Err(BridgeError::CameraRunning)
        ));
        session.stop_camera();

        session
            .set_color_resolution(ColorResolution::Res1920x1080x30)
            .unwrap();
        assert_eq!(session.color_buffer().len(), 1920 * 1080 * 4);
        assert!(session.color_buffer().iter().all(|&b| b == 0));

        session.start_camera().unwrap();
        assert!(wait_for(|| session.refresh()));
        assert_eq!(session.color_buffer().len(), 1920 * 1080 * 4);
    }

    #[test]
    fn invalid_combination_keeps_buffers() {
        let mut session = Session::open(&runtime(), config(Features::CAMERA_STREAMING)).unwrap();
        let err = session
            .set_depth_resolution(DepthResolution::Res480x360x60)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidStreamCombination { .. }));
        assert_eq!(session.depth_buffer().len(), 640 * 480);
    }

    #[test]
    fn provider_shares_one_session() {
        let provider = SessionProvider::new();
        let rt = runtime();
        let a = provider
            .get_or_open(|| Session::open(&rt, SessionConfig::default()))
            .unwrap();
        let b = provider
            .get_or_open(|| panic!("session should be reused"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        drop(a);
        drop(b);
        assert!(provider.current().is_none());
        let c = provider
            .get_or_open(|| Session::open(&rt, SessionConfig::default()))
            .unwrap();
        assert!(provider.current().is_some_and(|s| Arc::ptr_eq(&s, &c)));
    }
}
