use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::backend::Camera;
use crate::extract::Extractor;
use crate::features::{modules_for, FeatureRegistry};
use crate::scan::ScanController;
use crate::triad::BackBuffer;
use crate::types::Features;
use crate::{BridgeError, Result};

/// Lifecycle of the acquisition thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl LoopState {
    fn from_u8(v: u8) -> LoopState {
        match v {
            1 => LoopState::Starting,
            2 => LoopState::Running,
            3 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

/// Counters kept by the acquisition thread. Never reset.
#[derive(Debug, Default)]
pub struct LoopStats {
    published: AtomicU64,
    failed_acquires: AtomicU64,
}

impl LoopStats {
    /// Frames handed to the consumer side.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Acquisitions that failed for a reason other than a timeout.
    pub fn failed_acquires(&self) -> u64 {
        self.failed_acquires.load(Ordering::Relaxed)
    }
}

/// Everything the thread owns while it runs. Handed back on join.
pub(crate) struct LoopParts {
    pub camera: Box<dyn Camera>,
    pub back: BackBuffer,
    pub extractors: Vec<Box<dyn Extractor>>,
}

/// State shared between the session and the thread.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub features: Arc<FeatureRegistry>,
    pub scan: Arc<ScanController>,
    pub connected: Arc<AtomicBool>,
    pub stats: Arc<LoopStats>,
    pub state: Arc<AtomicU8>,
    pub acquire_timeout: Duration,
    pub retry_backoff: Duration,
}

impl LoopContext {
    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

pub(crate) fn load_state(state: &AtomicU8) -> LoopState {
    LoopState::from_u8(state.load(Ordering::Acquire))
}

/// Handle to a running acquisition thread.
pub(crate) struct AcquisitionLoop {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<Option<LoopParts>>>,
    state: Arc<AtomicU8>,
}

impl AcquisitionLoop {
    /// Spawn the thread. On failure the parts are returned untouched so the
    /// caller can put them back.
    pub(crate) fn start(
        parts: LoopParts,
        ctx: LoopContext,
        thread_name: &str,
    ) -> std::result::Result<AcquisitionLoop, (BridgeError, Option<LoopParts>)> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let keep = rx.clone();
        // The channel has room and a live receiver.
        let _ = tx.send(parts);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let state = ctx.state.clone();
        ctx.set_state(LoopState::Starting);

        let spawned = std::thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || acquisition_thread(rx, ctx, stop_clone));

        match spawned {
            Ok(thread) => Ok(AcquisitionLoop {
                stop_flag,
                thread: Some(thread),
                state,
            }),
            Err(e) => {
                state.store(LoopState::Stopped as u8, Ordering::Release);
                // The closure never ran, so the parts are still queued.
                Err((BridgeError::Spawn(e.to_string()), keep.try_recv().ok()))
            }
        }
    }

    /// Signal the thread and wait for it. Returns at most one iteration plus
    /// one acquire timeout after the call.
    pub(crate) fn stop(mut self) -> Result<LoopParts> {
        self.stop_flag.store(true, Ordering::Release);
        let joined = match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| BridgeError::WorkerPanicked),
            None => Ok(None),
        };
        self.state.store(LoopState::Stopped as u8, Ordering::Release);
        joined?.ok_or(BridgeError::WorkerPanicked)
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn enable_modules(camera: &mut dyn Camera, features: Features, registry: &FeatureRegistry) {
    for module in modules_for(features) {
        if let Err(e) = camera.enable_module(module) {
            log::warn!("Failed to enable {:?}: {}", module, e);
        }
    }
    registry.mark_initialized(features);
}

fn acquisition_thread(
    rx: Receiver<LoopParts>,
    ctx: LoopContext,
    stop_flag: Arc<AtomicBool>,
) -> Option<LoopParts> {
    let mut parts = rx.recv().ok()?;
    run(&mut parts, &ctx, &stop_flag);
    Some(parts)
}

fn run(parts: &mut LoopParts, ctx: &LoopContext, stop_flag: &AtomicBool) {
    let LoopParts {
        camera,
        back,
        extractors,
    } = parts;

    ctx.features.take_pending();
    let startup = ctx.features.snapshot();
    enable_modules(camera.as_mut(), startup, &ctx.features);
    if let Err(e) = camera.init() {
        log::warn!("Pipeline init failed: {}", e);
    }
    ctx.connected.store(camera.is_connected(), Ordering::Release);
    ctx.set_state(LoopState::Running);
    log::info!("Acquisition started with {:?}", startup);

    let mut consecutive_failures = 0u64;

    while !stop_flag.load(Ordering::Acquire) {
        let pending = ctx.features.take_pending();
        if !pending.is_empty() {
            log::debug!("Initialising {:?}", pending);
            enable_modules(camera.as_mut(), pending, &ctx.features);
        }

        match camera.acquire_frame(ctx.acquire_timeout) {
            Ok(()) => {}
            Err(BridgeError::Timeout) => {
                log::trace!("No frame within {:?}", ctx.acquire_timeout);
                continue;
            }
            Err(e) => {
                ctx.stats.failed_acquires.fetch_add(1, Ordering::Relaxed);
                if consecutive_failures == 0 {
                    log::warn!("Frame acquisition failed: {}", e);
                } else {
                    log::trace!("Frame acquisition failed again: {}", e);
                }
                consecutive_failures += 1;
                ctx.connected.store(camera.is_connected(), Ordering::Release);
                std::thread::sleep(ctx.retry_backoff);
                continue;
            }
        }

        if consecutive_failures > 0 {
            log::info!(
                "Acquisition recovered after {} failed attempt(s)",
                consecutive_failures
            );
            consecutive_failures = 0;
        }
        ctx.connected.store(camera.is_connected(), Ordering::Release);

        let seq = back.begin_cycle();
        let enabled = ctx.features.snapshot();
        for extractor in extractors.iter_mut() {
            if !enabled.contains(extractor.feature()) {
                back.frame_mut().clear_images(extractor.feature());
                continue;
            }
            if let Err(e) = extractor.extract(camera.as_mut(), back.frame_mut()) {
                log::debug!("{} extractor failed on frame {}: {}", extractor.name(), seq, e);
                back.frame_mut().clear_images(extractor.feature());
            }
        }
        camera.release_frame();

        if back.publish() {
            ctx.stats.published.fetch_add(1, Ordering::Relaxed);
        }
    }

    ctx.set_state(LoopState::Stopping);
    camera.close();
    ctx.features.reset_initialized();
    ctx.scan.pipeline_closed();
    log::info!(
        "Acquisition stopped after {} frame(s)",
        ctx.stats.published()
    );
}
