//! Run a short 3D scan on the simulated camera and save it as OBJ.
//!
//! Usage: cargo run --example scan [output-dir]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use sensebridge::mesh::{list_mesh_files, load_obj};
use sensebridge::sim::{SimulatedRuntime, SimulationConfig};
use sensebridge::{
    ColorResolution, Features, SaveOutcome, ScanFileFormat, ScanMode, Session, SessionConfig,
};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn main() {
    env_logger::init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let path = out_dir.join("sensebridge-scan.obj");

    let runtime = SimulatedRuntime::new(SimulationConfig::default());
    let config = SessionConfig {
        features: Features::CAMERA_STREAMING | Features::SCAN_3D,
        color: Some(ColorResolution::Res640x480x30),
        ..SessionConfig::from_env()
    };
    let mut session = match Session::open(&runtime, config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open session: {}", e);
            std::process::exit(1);
        }
    };

    session.configure_scanning(ScanMode::Object, true, true);
    session.set_scanning_volume([0.3, 0.3, 0.3], 256);
    if let Err(e) = session.start_camera() {
        eprintln!("Failed to start camera: {}", e);
        std::process::exit(1);
    }
    session.start_scanning();

    if !wait_until(Duration::from_secs(3), || session.is_scanning()) {
        eprintln!("Scanning did not start");
        std::process::exit(1);
    }
    println!("Scanning...");

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(2) {
        session.refresh();
        if session.has_scan_resolution_changed() {
            let (w, h) = session.scan_size();
            println!("Preview is now {}x{}", w, h);
        }
        std::thread::sleep(Duration::from_millis(30));
    }

    session.save_scan(ScanFileFormat::Obj, &path);
    if !wait_until(Duration::from_secs(5), || session.has_scan_completed()) {
        eprintln!("Reconstruction timed out");
        std::process::exit(1);
    }
    session.stop_camera();

    match session.last_save_outcome() {
        Some(SaveOutcome::Saved(p)) => match load_obj(&p) {
            Ok(mesh) => println!(
                "Saved {} ({} vertices, {} triangles)",
                p.display(),
                mesh.vertices.len(),
                mesh.triangle_count()
            ),
            Err(e) => eprintln!("Saved {} but could not read it back: {}", p.display(), e),
        },
        Some(SaveOutcome::Failed(msg)) => eprintln!("Reconstruction failed: {}", msg),
        None => eprintln!("No reconstruction result"),
    }

    if let Ok(files) = list_mesh_files(&out_dir) {
        println!("{} mesh file(s) in {}", files.len(), out_dir.display());
    }
}
