//! Boundary to the sensor SDK.
//!
//! The SDK owns device discovery, network ingestion, frame assembly and the
//! capture replay engine. It exposes exactly one callback slot per event type;
//! [`crate::channel`] multiplexes those slots.

use crate::error::SensorErrorCode;
use crate::types::{Options, SensorHandle, SensorImagePoint, SensorInformation};
use crate::Result;
use std::path::Path;
use std::time::Duration;

/// Image frame slot: `(sensor, points)`.
pub type ImageFrameListener = Box<dyn Fn(SensorHandle, &[SensorImagePoint]) + Send + Sync>;

/// Network packet slot: `(sensor, receive timestamp µs, bytes)`.
pub type NetworkPacketListener = Box<dyn Fn(SensorHandle, i64, &[u8]) + Send + Sync>;

/// Error slot: `(sensor, code, message)`.
pub type ErrorListener = Box<dyn Fn(SensorHandle, SensorErrorCode, &str) + Send + Sync>;

/// Operations consumed from the sensor SDK.
///
/// Listeners are invoked on SDK-owned threads.
pub trait SensorSdk: Send + Sync {
    /// Start the SDK. `on_error` receives every error the SDK reports.
    fn initialize(&self, options: &Options, on_error: ErrorListener) -> Result<()>;
    fn deinitialize(&self) -> Result<()>;
    fn is_initialized(&self) -> bool;

    /// Fails with [`SensorErrorCode::TooManyCallbacks`] if the slot is taken.
    fn listen_image_frames(&self, listener: ImageFrameListener) -> Result<()>;
    fn unlisten_image_frames(&self) -> Result<()>;

    fn listen_network_packets(&self, listener: NetworkPacketListener) -> Result<()>;
    fn unlisten_network_packets(&self) -> Result<()>;

    /// Error slot in addition to the handler given to [`SensorSdk::initialize`].
    fn listen_errors(&self, listener: ErrorListener) -> Result<()>;
    fn unlisten_errors(&self) -> Result<()>;

    fn sensor_count(&self) -> usize;
    fn sensor_information_by_index(&self, index: usize) -> Result<SensorInformation>;
    fn sensor_information(&self, handle: SensorHandle) -> Result<SensorInformation>;
    fn sensor_handle_by_serial_number(&self, serial_number: u64) -> Result<SensorHandle>;

    fn capture_replay(&self) -> &dyn CaptureReplay;
}

/// Playback of a recorded capture in place of the live network feed.
pub trait CaptureReplay: Send + Sync {
    /// Open a capture. Playback starts paused at the beginning.
    fn open(&self, path: &Path) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn is_open(&self) -> bool;
    /// True while playback advances on its own.
    fn is_running(&self) -> bool;
    fn is_end(&self) -> bool;
    fn enable_loop(&self) -> bool;
    fn set_enable_loop(&self, enabled: bool) -> Result<()>;
    /// Current capture timestamp, microseconds since the Unix epoch.
    fn time(&self) -> u64;
    /// Seek to `position` from the start of the capture.
    fn seek(&self, position: Duration) -> Result<()>;
    /// Advance paused playback by `duration`, returning once it has caught up.
    fn resume_blocking(&self, duration: Duration) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
}
