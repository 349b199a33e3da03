//! 3D scan command and state exchange.
//!
//! The consumer side records requests; the acquisition thread applies them
//! at the start of the scan step of each cycle and mirrors the middleware's
//! state back into atomics the consumer can poll.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};

use crate::backend::Camera;
use crate::frame::RgbaBuffer;
use crate::image::copy_color_sample;
use crate::types::{ScanConfiguration, ScanFileFormat, ScanMode, ScanVolume};
use crate::Result;

const REQUEST_NONE: u8 = 0;
const REQUEST_START: u8 = 1;
const REQUEST_STOP: u8 = 2;

/// Queued configuration changes, applied in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanCommand {
    Configure(ScanConfiguration),
    SetVolume(ScanVolume),
}

/// Result of the last reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Failed(String),
}

#[derive(Debug)]
pub struct ScanController {
    request: AtomicU8,
    reconstruct_requested: AtomicBool,
    reset_requested: AtomicBool,
    completed: AtomicBool,
    scanning: AtomicBool,
    resolution_changed: AtomicBool,
    /// Width in the high half, height in the low half.
    preview_size: AtomicU64,
    commands_tx: Sender<ScanCommand>,
    commands_rx: Receiver<ScanCommand>,
    save_target: Mutex<Option<(ScanFileFormat, PathBuf)>>,
    outcome: Mutex<Option<SaveOutcome>>,
}

impl Default for ScanController {
    fn default() -> Self {
        Self::new()
    }
}

fn pack(w: u32, h: u32) -> u64 {
    ((w as u64) << 32) | h as u64
}

impl ScanController {
    pub fn new() -> Self {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        Self {
            request: AtomicU8::new(REQUEST_NONE),
            reconstruct_requested: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            resolution_changed: AtomicBool::new(false),
            preview_size: AtomicU64::new(0),
            commands_tx,
            commands_rx,
            save_target: Mutex::new(None),
            outcome: Mutex::new(None),
        }
    }

    // Consumer side.

    /// Queue a new scanning mode. Takes effect on the next cycle and does not
    /// start scanning by itself.
    pub fn configure(&self, mode: ScanMode, solidify: bool, texture: bool) {
        let config = ScanConfiguration {
            mode,
            solidify,
            texture,
            start_scan: false,
        };
        // The receiver lives in `self`, so the channel cannot be disconnected.
        let _ = self.commands_tx.send(ScanCommand::Configure(config));
    }

    pub fn set_volume(&self, bounding_box: [f32; 3], resolution: u32) {
        let _ = self.commands_tx.send(ScanCommand::SetVolume(ScanVolume {
            bounding_box,
            resolution,
        }));
    }

    /// Ask the middleware to start scanning. Clears the completion flag.
    pub fn start(&self) {
        self.completed.store(false, Ordering::Release);
        self.request.store(REQUEST_START, Ordering::Release);
    }

    pub fn stop(&self) {
        self.request.store(REQUEST_STOP, Ordering::Release);
    }

    /// Discard the accumulated volume.
    pub fn reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Reconstruct the current scan into `path` on the next cycle.
    /// Completion is reported through [`has_completed`](Self::has_completed).
    pub fn save(&self, format: ScanFileFormat, path: impl AsRef<Path>) {
        let mut target = self.lock_target();
        *target = Some((format, path.as_ref().to_path_buf()));
        self.completed.store(false, Ordering::Release);
        self.reconstruct_requested.store(true, Ordering::Release);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    pub fn has_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// True once after the preview size changed.
    pub fn take_resolution_changed(&self) -> bool {
        self.resolution_changed.swap(false, Ordering::AcqRel)
    }

    pub fn preview_size(&self) -> (u32, u32) {
        let packed = self.preview_size.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    pub fn last_save_outcome(&self) -> Option<SaveOutcome> {
        self.outcome.lock().ok().and_then(|o| o.clone())
    }

    // Acquisition side.

    fn apply_requests(&self, camera: &mut dyn Camera) -> Result<()> {
        for command in self.commands_rx.try_iter() {
            match command {
                ScanCommand::Configure(mut config) => {
                    config.start_scan = camera.scan_configuration().start_scan;
                    camera.set_scan_configuration(config)?;
                    log::debug!("Scan configured: {:?}", config);
                }
                ScanCommand::SetVolume(volume) => {
                    camera.set_scan_area(volume)?;
                    log::debug!("Scan volume set: {:?}", volume);
                }
            }
        }

        if self.reset_requested.swap(false, Ordering::AcqRel) {
            camera.reset_scan()?;
            log::debug!("Scan reset");
        }

        match self.request.swap(REQUEST_NONE, Ordering::AcqRel) {
            REQUEST_START => set_scanning(camera, true)?,
            REQUEST_STOP => set_scanning(camera, false)?,
            _ => {}
        }
        Ok(())
    }

    /// Copy the preview image into `preview`. Each frame's buffer is resized
    /// as it passes through here, so a size change reaches the consumer one
    /// frame at a time with matching content.
    fn capture_preview(&self, camera: &mut dyn Camera, preview: &mut RgbaBuffer) -> Result<()> {
        let Some(image) = camera.query_scan_preview() else {
            return Ok(());
        };
        let (w, h) = (image.width, image.height);
        if pack(w, h) != self.preview_size.load(Ordering::Acquire) {
            self.preview_size.store(pack(w, h), Ordering::Release);
            self.resolution_changed.store(true, Ordering::Release);
            log::debug!("Scan preview is now {}x{}", w, h);
        }
        preview.ensure_size(w, h);
        copy_color_sample(&image, preview)
    }

    /// The request flag and the target only change together under this lock.
    fn lock_target(&self) -> MutexGuard<'_, Option<(ScanFileFormat, PathBuf)>> {
        self.save_target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reconstruct(&self, camera: &mut dyn Camera) {
        let target = {
            let mut target = self.lock_target();
            if !self.reconstruct_requested.swap(false, Ordering::AcqRel) {
                return;
            }
            target.take()
        };

        let outcome = match target {
            Some((format, path)) => match camera.reconstruct(format, &path) {
                Ok(()) => {
                    log::info!("Scan saved to {}", path.display());
                    SaveOutcome::Saved(path)
                }
                Err(e) => {
                    log::warn!("Scan reconstruction failed: {}", e);
                    SaveOutcome::Failed(e.to_string())
                }
            },
            None => SaveOutcome::Failed("no save target".into()),
        };

        if let Ok(mut slot) = self.outcome.lock() {
            *slot = Some(outcome);
        }

        // A save issued during reconstruction stays pending for the next cycle.
        let _target = self.lock_target();
        if !self.reconstruct_requested.load(Ordering::Acquire) {
            self.completed.store(true, Ordering::Release);
        }
    }

    /// One cycle of scan work. Requests are applied first so a preview of
    /// the new state is captured in the same cycle.
    pub(crate) fn step(&self, camera: &mut dyn Camera, preview: &mut RgbaBuffer) -> Result<()> {
        let applied = self.apply_requests(camera);
        let captured = self.capture_preview(camera, preview);
        // Scanning state is published before completion.
        self.scanning.store(camera.is_scanning(), Ordering::Release);
        self.reconstruct(camera);
        applied.and(captured)
    }

    /// Forget middleware state after the pipeline closed.
    pub(crate) fn pipeline_closed(&self) {
        self.scanning.store(false, Ordering::Release);
    }
}

fn set_scanning(camera: &mut dyn Camera, on: bool) -> Result<()> {
    let mut config = camera.scan_configuration();
    if config.start_scan != on {
        config.start_scan = on;
        camera.set_scan_configuration(config)?;
        log::debug!("Scanning {}", if on { "started" } else { "stopped" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Module;
    use crate::sim::{SimulatedCamera, SimulationConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn scanning_camera() -> SimulatedCamera {
        let mut cam = SimulatedCamera::new(SimulationConfig {
            frame_rate: Some(1000.0),
            ..Default::default()
        });
        cam.enable_module(Module::Scan3D).unwrap();
        cam.init().unwrap();
        cam
    }

    fn cycle(scan: &ScanController, cam: &mut SimulatedCamera, preview: &mut RgbaBuffer) {
        cam.acquire_frame(Duration::from_millis(100)).unwrap();
        scan.step(cam, preview).unwrap();
        cam.release_frame();
    }

    #[test]
    fn last_request_wins() {
        let scan = ScanController::new();
        let mut cam = scanning_camera();
        let mut preview = RgbaBuffer::default();
        scan.start();
        scan.stop();
        cycle(&scan, &mut cam, &mut preview);
        assert!(!scan.is_scanning());

        scan.stop();
        scan.start();
        cycle(&scan, &mut cam, &mut preview);
        assert!(scan.is_scanning());
    }

    #[test]
    fn preview_resize_is_latched() {
        let scan = ScanController::new();
        let mut cam = scanning_camera();
        let mut preview = RgbaBuffer::default();

        cycle(&scan, &mut cam, &mut preview);
        assert_eq!(scan.preview_size(), (160, 120));
        assert_eq!(preview.dimensions(), (160, 120));
        assert!(scan.take_resolution_changed());
        assert!(!scan.take_resolution_changed());

        // The middleware switches preview size on the frame after the start.
        scan.start();
        cycle(&scan, &mut cam, &mut preview);
        cycle(&scan, &mut cam, &mut preview);
        assert_eq!(preview.dimensions(), (320, 240));
        assert_eq!(preview.as_slice().len(), 320 * 240 * 4);
        assert!(scan.take_resolution_changed());

        cycle(&scan, &mut cam, &mut preview);
        assert!(!scan.take_resolution_changed());
    }

    #[test]
    fn save_completes_and_keeps_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.obj");
        let scan = ScanController::new();
        let mut cam = scanning_camera();
        let mut preview = RgbaBuffer::default();

        scan.set_volume([0.5, 0.5, 0.5], 128);
        scan.start();
        cycle(&scan, &mut cam, &mut preview);
        assert!(scan.is_scanning());
        assert!(!scan.has_completed());

        scan.save(ScanFileFormat::Obj, &path);
        cycle(&scan, &mut cam, &mut preview);
        assert!(scan.has_completed());
        assert!(scan.is_scanning());
        assert_eq!(scan.last_save_outcome(), Some(SaveOutcome::Saved(path.clone())));
        assert_eq!(crate::mesh::load_obj(&path).unwrap().triangle_count(), 4);

        scan.start();
        assert!(!scan.has_completed());
    }

    #[test]
    fn start_and_save_apply_in_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.obj");
        let scan = ScanController::new();
        let mut cam = scanning_camera();
        let mut preview = RgbaBuffer::default();

        scan.start();
        scan.save(ScanFileFormat::Obj, &path);
        cycle(&scan, &mut cam, &mut preview);

        assert_eq!(cam.scanning_at_reconstruct(), Some(true));
        assert!(scan.has_completed());
        assert!(scan.is_scanning());
        assert_eq!(scan.last_save_outcome(), Some(SaveOutcome::Saved(path)));
    }

    #[test]
    fn save_during_reconstruction_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.obj");
        let second = dir.path().join("b.obj");
        let scan = Arc::new(ScanController::new());
        let mut cam = SimulatedCamera::new(SimulationConfig {
            frame_rate: Some(1000.0),
            reconstruct_delay: Duration::from_millis(300),
            ..Default::default()
        });
        cam.enable_module(Module::Scan3D).unwrap();
        cam.init().unwrap();

        scan.save(ScanFileFormat::Obj, &first);
        let worker = {
            let scan = scan.clone();
            std::thread::spawn(move || {
                let mut preview = RgbaBuffer::default();
                cycle(&scan, &mut cam, &mut preview);
                (cam, preview)
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        scan.save(ScanFileFormat::Obj, &second);
        let (mut cam, mut preview) = worker.join().unwrap();

        assert!(first.exists());
        assert!(!scan.has_completed());
        assert_eq!(scan.last_save_outcome(), Some(SaveOutcome::Saved(first)));

        cycle(&scan, &mut cam, &mut preview);
        assert!(scan.has_completed());
        assert!(second.exists());
        assert_eq!(scan.last_save_outcome(), Some(SaveOutcome::Saved(second)));
    }

    #[test]
    fn failed_save_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("scan.obj");
        let scan = ScanController::new();
        let mut cam = scanning_camera();
        let mut preview = RgbaBuffer::default();

        scan.save(ScanFileFormat::Obj, &path);
        cycle(&scan, &mut cam, &mut preview);
        assert!(scan.has_completed());
        assert!(matches!(scan.last_save_outcome(), Some(SaveOutcome::Failed(_))));
    }

    #[test]
    fn configure_keeps_scanning_state() {
        let scan = ScanController::new();
        let mut cam = scanning_camera();
        let mut preview = RgbaBuffer::default();
        scan.start();
        cycle(&scan, &mut cam, &mut preview);

        scan.configure(ScanMode::Face, true, true);
        cycle(&scan, &mut cam, &mut preview);
        let config = cam.scan_configuration();
        assert_eq!(config.mode, ScanMode::Face);
        assert!(config.solidify && config.texture);
        assert!(scan.is_scanning());
    }
}
