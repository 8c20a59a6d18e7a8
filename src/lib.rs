//! # cepton-api - convenience layer over the Cepton lidar SDK
//!
//! Provides:
//! - Session lifecycle for live sensors and capture replay
//! - Multi-subscriber callback channels for image frames, network packets and errors
//! - Image point to Cartesian conversion with rigid transforms
//! - A simulated SDK backend, and a native binding behind the `cepton-sdk` feature
//!
//! ## Quick Start
//! ```no_run
//! use cepton_api::{FrameStream, Options, Session, SimulatedSdk};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let mut session = Session::new(Arc::new(SimulatedSdk::new()));
//! session.initialize(Options::default(), None).unwrap();
//!
//! let frames = session.image_frames();
//! frames.initialize().unwrap();
//! let stream = FrameStream::subscribe(&frames, 1, 16);
//! for _ in 0..10 {
//!     let frame = stream.recv_timeout(Duration::from_secs(1)).unwrap();
//!     println!("sensor {}: {} points", frame.handle, frame.points.len());
//! }
//! ```

pub mod channel;
pub mod error;
pub mod export;
#[cfg(feature = "cepton-sdk")]
pub mod ffi;
pub mod registry;
pub mod sdk;
pub mod session;
pub mod sim;
pub mod stream;
pub mod transform;
pub mod types;

pub use channel::{ImageFrameChannel, NetworkPacketChannel, SensorErrorChannel};
pub use error::{check_error, log_error, SensorError, SensorErrorCode};
pub use registry::{CallbackId, CallbackRegistry};
pub use sdk::{CaptureReplay, SensorSdk};
pub use session::{ErrorPolicy, Session, SessionState};
pub use sim::{SimulatedConfig, SimulatedSdk};
pub use stream::{FrameStream, ImageFrame, StreamError};
pub use transform::{to_cartesian, RigidTransform};
pub use types::*;

#[cfg(feature = "cepton-sdk")]
pub use ffi::CeptonSdk;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SensorError>;
