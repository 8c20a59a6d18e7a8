//! SDK lifecycle, time source and error escalation.

use crate::channel::{Channel, ImageFrameChannel, NetworkPacketChannel, SensorErrorChannel};
use crate::error::{log_error, log_result, SensorError, SensorErrorCode};
use crate::sdk::{ErrorListener, SensorSdk};
use crate::types::{ControlFlags, Options, SensorHandle, SensorInformation};
use crate::Result;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time given to the SDK after initialization to discover sensors.
pub const WARM_UP: Duration = Duration::from_secs(1);

/// Step used by [`Session::wait`] when waiting for the end of a capture.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How errors reported asynchronously by the SDK are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log every error.
    #[default]
    Permissive,
    /// Log faults; hold fatal errors and return the first one from the next
    /// [`Session::wait`].
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    TornDown,
}

/// Error handler installed by [`ErrorPolicy::Permissive`].
pub fn default_on_error(handle: SensorHandle, code: SensorErrorCode, message: &str) {
    log_error(&SensorError::new(code, message), &format!("Sensor {}", handle));
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn wall_clock_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Owns the SDK lifecycle for one application.
///
/// ```no_run
/// use cepton_api::{Options, Session, SimulatedSdk};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut session = Session::new(Arc::new(SimulatedSdk::new()));
/// session.initialize(Options::default(), None).unwrap();
///
/// let frames = session.image_frames();
/// frames.initialize().unwrap();
/// frames.listen(1, |handle, points| println!("{}: {} points", handle, points.len()));
///
/// session.wait(Duration::from_secs(1)).unwrap();
/// ```
pub struct Session {
    sdk: Arc<dyn SensorSdk>,
    policy: ErrorPolicy,
    state: SessionState,
    pending: Arc<Mutex<Option<SensorError>>>,
}

impl Session {
    pub fn new(sdk: Arc<dyn SensorSdk>) -> Self {
        Self::with_policy(sdk, ErrorPolicy::default())
    }

    pub fn with_policy(sdk: Arc<dyn SensorSdk>, policy: ErrorPolicy) -> Self {
        Self {
            sdk,
            policy,
            state: SessionState::Uninitialized,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn sdk(&self) -> &Arc<dyn SensorSdk> {
        &self.sdk
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    fn error_handler(&self) -> ErrorListener {
        match self.policy {
            ErrorPolicy::Permissive => Box::new(default_on_error),
            ErrorPolicy::Strict => {
                let pending = self.pending.clone();
                Box::new(move |handle: SensorHandle, code: SensorErrorCode, message: &str| {
                    let error = SensorError::new(code, message);
                    if !error.is_fatal() {
                        log_error(&error, &format!("Sensor {}", handle));
                        return;
                    }
                    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
                    if pending.is_none() {
                        *pending = Some(error);
                    }
                })
            }
        }
    }

    /// Start the SDK, optionally replaying a capture instead of listening on
    /// the network.
    ///
    /// With a capture, the network is disabled, the capture is opened paused
    /// and rewound to its start after the warm-up. The first failing step
    /// aborts the sequence and its error is returned.
    pub fn initialize(&mut self, mut options: Options, capture_path: Option<&Path>) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Initialized => {
                return Err(SensorError::from_code(SensorErrorCode::AlreadyInitialized));
            }
            SessionState::TornDown => {
                return Err(SensorError::new(
                    SensorErrorCode::AlreadyInitialized,
                    "Session was torn down",
                ));
            }
        }

        let capture_path = capture_path.filter(|p| !p.as_os_str().is_empty());
        if capture_path.is_some() {
            options.control_flags |= ControlFlags::DISABLE_NETWORK;
        }

        self.sdk.initialize(&options, self.error_handler())?;
        self.state = SessionState::Initialized;

        if let Some(path) = capture_path {
            self.sdk.capture_replay().open(path)?;
            log::info!("Replaying capture {}", path.display());
        }

        self.wait(WARM_UP)?;

        if capture_path.is_some() {
            self.sdk.capture_replay().seek(Duration::ZERO)?;
        }
        Ok(())
    }

    /// Close any capture and stop the SDK. Safe to call repeatedly.
    pub fn deinitialize(&mut self) -> Result<()> {
        if self.state != SessionState::Initialized {
            self.state = SessionState::TornDown;
            return Ok(());
        }
        self.state = SessionState::TornDown;

        let replay = self.sdk.capture_replay();
        if replay.is_open() {
            let _ = log_result(replay.close(), "Failed to close capture replay");
        }
        self.sdk.deinitialize()
    }

    /// True when no capture replay is open.
    pub fn is_live(&self) -> bool {
        !self.sdk.capture_replay().is_open()
    }

    /// True when live, or when the capture replay advances on its own.
    pub fn is_realtime(&self) -> bool {
        self.is_live() || self.sdk.capture_replay().is_running()
    }

    /// True once a non-looping capture has been played to the end.
    pub fn is_end(&self) -> bool {
        let replay = self.sdk.capture_replay();
        if !replay.is_open() || replay.enable_loop() {
            return false;
        }
        replay.is_end()
    }

    /// Microseconds since the Unix epoch: wall clock when live, capture time
    /// otherwise. All timestamped output should use this clock.
    pub fn time(&self) -> u64 {
        if self.is_live() {
            wall_clock_usec()
        } else {
            self.sdk.capture_replay().time()
        }
    }

    /// Sleep, or advance a paused capture, for `duration`.
    ///
    /// A zero duration waits until the end of the capture, in
    /// [`POLL_INTERVAL`] steps. When live, or when the capture loops, that
    /// never happens and only an error ends the wait.
    pub fn wait(&self, duration: Duration) -> Result<()> {
        if !duration.is_zero() {
            return self.wait_once(duration);
        }
        self.take_pending()?;
        while !self.is_end() {
            self.wait_once(POLL_INTERVAL)?;
        }
        Ok(())
    }

    fn wait_once(&self, duration: Duration) -> Result<()> {
        if self.is_realtime() {
            std::thread::sleep(duration);
        } else {
            self.sdk.capture_replay().resume_blocking(duration)?;
        }
        self.take_pending()
    }

    fn take_pending(&self) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Serial numbers of all known sensors, sorted. Sensors whose information
    /// cannot be read are logged and skipped.
    pub fn sensor_serial_numbers(&self) -> Vec<u64> {
        let mut serial_numbers: Vec<u64> = (0..self.sdk.sensor_count())
            .filter_map(|i| {
                log_result(self.sdk.sensor_information_by_index(i), "Sensor information").ok()
            })
            .map(|info| info.serial_number)
            .collect();
        serial_numbers.sort_unstable();
        serial_numbers
    }

    pub fn has_sensor(&self, serial_number: u64) -> bool {
        self.sdk.sensor_handle_by_serial_number(serial_number).is_ok()
    }

    /// Fails with [`SensorErrorCode::SensorNotFound`] for unknown sensors.
    pub fn sensor_information_by_serial_number(&self, serial_number: u64) -> Result<SensorInformation> {
        let handle = self.sdk.sensor_handle_by_serial_number(serial_number)?;
        self.sdk.sensor_information(handle)
    }

    pub fn image_frames(&self) -> ImageFrameChannel {
        Channel::new(self.sdk.clone())
    }

    pub fn network_packets(&self) -> NetworkPacketChannel {
        Channel::new(self.sdk.clone())
    }

    pub fn sensor_errors(&self) -> SensorErrorChannel {
        Channel::new(self.sdk.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.deinitialize() {
            log::warn!("Failed to deinitialize SDK: {}", e);
        }
    }
}
