//! Stream color, depth and head tracking from the simulated camera.
//!
//! Usage: cargo run --example stream
//! Stream settings can be overridden with SENSEBRIDGE_* variables.

use std::time::{Duration, Instant};

use sensebridge::image::{depth_to_intensity, max_depth_mm};
use sensebridge::sim::{SimulatedRuntime, SimulationConfig};
use sensebridge::{ColorResolution, DepthResolution, Features, Session, SessionConfig};

fn main() {
    env_logger::init();

    let mut config = SessionConfig::from_env();
    config.features |= Features::CAMERA_STREAMING | Features::HEAD_TRACKING;
    config.color = config.color.or(Some(ColorResolution::Res640x480x30));
    config.depth = config.depth.or(Some(DepthResolution::Res640x480x30));

    let runtime = SimulatedRuntime::new(SimulationConfig::default());
    let mut session = match Session::open(&runtime, config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open session: {}", e);
            std::process::exit(1);
        }
    };

    println!("Model:    {}", session.query_model().label());
    println!("Firmware: {}", session.query_firmware());
    println!("Features: {:?}", session.features());
    println!();

    if let Err(e) = session.start_camera() {
        eprintln!("Failed to start camera: {}", e);
        std::process::exit(1);
    }

    let max_depth = max_depth_mm(
        session.query_model(),
        session.frame().depth_image.width(),
    );
    let start = Instant::now();
    let mut frames: u64 = 0;

    while start.elapsed() < Duration::from_secs(5) {
        if !session.refresh() {
            std::thread::sleep(Duration::from_millis(2));
            continue;
        }
        frames += 1;

        if frames % 30 == 1 {
            let depth = session.frame().depth_image.as_slice();
            let center = depth.get(depth.len() / 2).copied().unwrap_or(0);
            let head = session.head_position();
            println!(
                "seq={:<6} depth[c]={:>4}mm ({:>3})  heads={}  head=[{:+.1}, {:+.1}, {:+.1}]",
                session.sequence_number(),
                center,
                depth_to_intensity(center, max_depth),
                session.head_count(),
                head[0],
                head[1],
                head[2],
            );
        }
    }

    session.stop_camera();
    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} frames seen, {} published, {} failed in {:.1}s ({:.1} Hz)",
        frames,
        session.stats().published(),
        session.stats().failed_acquires(),
        elapsed,
        frames as f64 / elapsed
    );
}
