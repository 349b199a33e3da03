//! # sensebridge - depth camera bridge for real-time engines
//!
//! Runs a depth camera and its middleware (face, hand cursor, segmentation,
//! blob tracking, 3D scanning) on a background thread and hands the results
//! to a consumer through a lock-light triple buffer. Provides:
//! - A [`Session`] facade with per-feature enable/disable and stream setup
//! - A simulated camera for headless runs and tests
//! - OBJ mesh loading and saving for scan results
//! - C FFI for engine plugins
//!
//! ## Quick Start
//! ```no_run
//! use sensebridge::sim::{SimulatedRuntime, SimulationConfig};
//! use sensebridge::{ColorResolution, Features, Session, SessionConfig};
//!
//! let runtime = SimulatedRuntime::new(SimulationConfig::default());
//! let mut session = Session::open(&runtime, SessionConfig {
//!     features: Features::CAMERA_STREAMING,
//!     color: Some(ColorResolution::Res640x480x30),
//!     ..Default::default()
//! }).unwrap();
//!
//! session.start_camera().unwrap();
//! loop {
//!     if session.refresh() {
//!         println!("frame {}: {} bytes", session.sequence_number(), session.color_buffer().len());
//!     }
//! }
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod backend;
pub mod image;
pub mod frame;
pub mod triad;
pub mod features;
pub mod device;
pub mod scan;
pub mod extract;
pub mod acquisition;
pub mod session;
pub mod mesh;
pub mod sim;
pub mod ffi;

pub use error::BridgeError;
pub use types::*;
pub use config::SessionConfig;
pub use session::{Session, SessionProvider};
pub use scan::SaveOutcome;
pub use acquisition::{LoopState, LoopStats};
pub use frame::DataFrame;

/// Result type alias for sensebridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
