//! In-process stand-in for the sensor SDK.
//!
//! [`SimulatedSdk`] implements [`SensorSdk`] and [`CaptureReplay`] with
//! synthetic sensors. The live feed runs on its own thread and emits one frame
//! per sensor every `frame_period`; the capture replay is a virtual recording
//! of `capture_length` that advances only through `resume_blocking` or while
//! resumed.

use crate::error::{SensorError, SensorErrorCode};
use crate::sdk::{
    CaptureReplay, ErrorListener, ImageFrameListener, NetworkPacketListener, SensorSdk,
};
use crate::types::{
    ControlFlags, ImagePointFlags, Options, SensorHandle, SensorImagePoint, SensorInformation,
};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shape of the synthetic data.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub sensor_count: usize,
    pub points_per_frame: usize,
    pub frame_period: Duration,
    /// Length of the virtual capture. Never shorter than one frame period.
    pub capture_length: Duration,
    /// Timestamp of the first capture sample, microseconds since the Unix epoch.
    pub capture_start_time: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            sensor_count: 1,
            points_per_frame: 64,
            frame_period: Duration::from_millis(100),
            capture_length: Duration::from_secs(10),
            capture_start_time: 1_500_000_000_000_000,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn error(code: SensorErrorCode, message: &str) -> SensorError {
    SensorError::new(code, message)
}

fn wall_clock_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Synthetic scan: a horizontal sweep with a gentle vertical wave.
fn synthesize_frame(frame_index: u64, timestamp: i64, n_points: usize) -> Vec<SensorImagePoint> {
    (0..n_points)
        .map(|i| {
            let u = if n_points > 1 {
                i as f32 / (n_points - 1) as f32
            } else {
                0.5
            };
            let phase = frame_index as f32 * 0.1 + u * std::f32::consts::TAU;
            let mut flags = ImagePointFlags::VALID;
            if u > 0.95 {
                flags |= ImagePointFlags::SATURATED;
            }
            SensorImagePoint {
                timestamp: timestamp + i as i64 * 10,
                image_x: u - 0.5,
                distance: 5.0 + 2.0 * u + 0.01 * (frame_index % 100) as f32,
                image_z: 0.1 * phase.sin(),
                intensity: 0.2 + 0.6 * u,
                return_type: 1,
                flags,
                reserved: [0; 2],
            }
        })
        .collect()
}

/// Raw bytes standing in for the UDP payload of a frame.
fn encode_packet(points: &[SensorImagePoint]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(points.len() * 12);
    for p in points {
        buf.extend_from_slice(&p.image_x.to_le_bytes());
        buf.extend_from_slice(&p.distance.to_le_bytes());
        buf.extend_from_slice(&p.image_z.to_le_bytes());
    }
    buf
}

#[derive(Debug, Default)]
struct ReplayState {
    path: Option<PathBuf>,
    position_us: u64,
    looping: bool,
    running: bool,
}

struct Shared {
    config: SimulatedConfig,
    sensors: Vec<SensorInformation>,
    initialized: AtomicBool,
    live_frames: AtomicU64,
    on_error: Mutex<Option<ErrorListener>>,
    frames: Mutex<Option<ImageFrameListener>>,
    packets: Mutex<Option<NetworkPacketListener>>,
    errors: Mutex<Option<ErrorListener>>,
    replay: Mutex<ReplayState>,
}

impl Shared {
    fn period_us(&self) -> u64 {
        (self.config.frame_period.as_micros() as u64).max(1)
    }

    fn length_us(&self) -> u64 {
        (self.config.capture_length.as_micros() as u64).max(self.period_us())
    }

    fn emit_frames(&self, frame_index: u64, timestamp: i64) {
        for sensor in &self.sensors {
            let points = synthesize_frame(frame_index, timestamp, self.config.points_per_frame);
            if let Some(listener) = lock(&self.packets).as_ref() {
                listener(sensor.handle, timestamp, &encode_packet(&points));
            }
            if let Some(listener) = lock(&self.frames).as_ref() {
                listener(sensor.handle, &points);
            }
        }
    }

    fn emit_live_frame(&self) -> bool {
        let index = self.live_frames.fetch_add(1, Ordering::Relaxed);
        self.emit_frames(index, wall_clock_usec() as i64);
        true
    }

    fn report_error(&self, handle: SensorHandle, code: SensorErrorCode, message: &str) {
        if let Some(on_error) = lock(&self.on_error).as_ref() {
            on_error(handle, code, message);
        }
        if let Some(listener) = lock(&self.errors).as_ref() {
            listener(handle, code, message);
        }
    }

    /// Move the replay clock forward, emitting every frame boundary crossed.
    fn advance_replay(&self, duration: Duration) -> Result<()> {
        let period = self.period_us();
        let length = self.length_us();
        let start = self.config.capture_start_time;
        let mut remaining = duration.as_micros() as u64;

        loop {
            let position = {
                let mut replay = lock(&self.replay);
                if replay.path.is_none() {
                    return Err(error(SensorErrorCode::NotOpen, "capture replay"));
                }
                let next = (replay.position_us / period + 1) * period;
                let target = replay.position_us + remaining;
                if next <= target && next <= length {
                    remaining -= next - replay.position_us;
                    replay.position_us = next;
                    next
                } else if target >= length && replay.looping && remaining > 0 {
                    remaining -= length - replay.position_us;
                    replay.position_us = 0;
                    continue;
                } else {
                    replay.position_us = target.min(length);
                    return Ok(());
                }
            };
            self.emit_frames(position / period, (start + position) as i64);
        }
    }

    /// One tick of a resumed replay. Returns false once playback stops.
    fn step_replay(&self) -> bool {
        if let Err(e) = self.advance_replay(self.config.frame_period) {
            log::warn!("Simulated replay stopped: {}", e);
            lock(&self.replay).running = false;
            return false;
        }
        let mut replay = lock(&self.replay);
        if !replay.looping && replay.position_us >= self.length_us() {
            replay.running = false;
        }
        replay.running
    }
}

/// Background thread driving a live or replay feed.
struct Feed {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Feed {
    fn spawn(name: &str, shared: Arc<Shared>, step: fn(&Shared) -> bool) -> Result<Feed> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || feed_loop(&shared, step, &stop_clone))
            .map_err(|e| {
                SensorError::new(
                    SensorErrorCode::Generic,
                    format!("Failed to spawn simulated feed: {}", e),
                )
            })?;

        Ok(Feed {
            stop_flag,
            thread: Some(thread),
        })
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn feed_loop(shared: &Shared, step: fn(&Shared) -> bool, stop_flag: &AtomicBool) {
    log::debug!("Simulated feed started");
    loop {
        std::thread::sleep(shared.config.frame_period);
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        if !step(shared) {
            break;
        }
    }
    log::debug!("Simulated feed stopped");
}

/// Simulated SDK with synthetic sensors.
///
/// Listeners must not call back into the SDK's listen/unlisten or
/// resume/pause functions; those wait for in-flight callbacks.
pub struct SimulatedSdk {
    shared: Arc<Shared>,
    live_feed: Mutex<Option<Feed>>,
    replay_feed: Mutex<Option<Feed>>,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self::with_config(SimulatedConfig::default())
    }

    pub fn with_config(config: SimulatedConfig) -> Self {
        let sensors = (0..config.sensor_count)
            .map(|i| SensorInformation {
                handle: i as SensorHandle + 1,
                serial_number: 1000 + i as u64,
                model_name: "Simulated".into(),
                firmware_version: "sim-1.0".into(),
                last_reported_temperature: 25.0,
                return_count: 1,
                is_mocked: true,
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                config,
                sensors,
                initialized: AtomicBool::new(false),
                live_frames: AtomicU64::new(0),
                on_error: Mutex::new(None),
                frames: Mutex::new(None),
                packets: Mutex::new(None),
                errors: Mutex::new(None),
                replay: Mutex::new(ReplayState::default()),
            }),
            live_feed: Mutex::new(None),
            replay_feed: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.shared.config
    }

    /// Deliver a frame to the image frame slot, as if received from `handle`.
    pub fn inject_frame(&self, handle: SensorHandle, points: &[SensorImagePoint]) {
        if let Some(listener) = lock(&self.shared.frames).as_ref() {
            listener(handle, points);
        }
    }

    pub fn inject_packet(&self, handle: SensorHandle, timestamp: i64, buffer: &[u8]) {
        if let Some(listener) = lock(&self.shared.packets).as_ref() {
            listener(handle, timestamp, buffer);
        }
    }

    /// Report an error through the initialization handler and the error slot.
    pub fn inject_error(&self, handle: SensorHandle, code: SensorErrorCode, message: &str) {
        self.shared.report_error(handle, code, message);
    }

    pub fn has_image_frame_listener(&self) -> bool {
        lock(&self.shared.frames).is_some()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.shared.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(error(SensorErrorCode::NotInitialized, "simulated sdk"))
        }
    }

    fn occupy<T>(&self, slot: &Mutex<Option<T>>, listener: T) -> Result<()> {
        self.ensure_initialized()?;
        let mut slot = lock(slot);
        if slot.is_some() {
            return Err(error(SensorErrorCode::TooManyCallbacks, "simulated sdk"));
        }
        *slot = Some(listener);
        Ok(())
    }

    fn stop_replay_feed(&self) {
        lock(&self.shared.replay).running = false;
        if let Some(mut feed) = lock(&self.replay_feed).take() {
            feed.shutdown();
        }
    }
}

impl Default for SimulatedSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSdk for SimulatedSdk {
    fn initialize(&self, options: &Options, on_error: ErrorListener) -> Result<()> {
        if self.shared.initialized.swap(true, Ordering::SeqCst) {
            return Err(error(SensorErrorCode::AlreadyInitialized, "simulated sdk"));
        }
        *lock(&self.shared.on_error) = Some(on_error);

        if !options.control_flags.contains(ControlFlags::DISABLE_NETWORK) {
            let feed = Feed::spawn("sim-live", self.shared.clone(), Shared::emit_live_frame)?;
            *lock(&self.live_feed) = Some(feed);
        }

        log::info!(
            "Simulated SDK initialized ({} sensors, network {})",
            self.shared.sensors.len(),
            if options.control_flags.contains(ControlFlags::DISABLE_NETWORK) {
                "disabled"
            } else {
                "enabled"
            }
        );
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        self.ensure_initialized()?;
        if let Some(mut feed) = lock(&self.live_feed).take() {
            feed.shutdown();
        }
        self.stop_replay_feed();

        *lock(&self.shared.replay) = ReplayState::default();
        *lock(&self.shared.frames) = None;
        *lock(&self.shared.packets) = None;
        *lock(&self.shared.errors) = None;
        *lock(&self.shared.on_error) = None;
        self.shared.initialized.store(false, Ordering::SeqCst);

        log::info!("Simulated SDK deinitialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    fn listen_image_frames(&self, listener: ImageFrameListener) -> Result<()> {
        self.occupy(&self.shared.frames, listener)
    }

    fn unlisten_image_frames(&self) -> Result<()> {
        *lock(&self.shared.frames) = None;
        Ok(())
    }

    fn listen_network_packets(&self, listener: NetworkPacketListener) -> Result<()> {
        self.occupy(&self.shared.packets, listener)
    }

    fn unlisten_network_packets(&self) -> Result<()> {
        *lock(&self.shared.packets) = None;
        Ok(())
    }

    fn listen_errors(&self, listener: ErrorListener) -> Result<()> {
        self.occupy(&self.shared.errors, listener)
    }

    fn unlisten_errors(&self) -> Result<()> {
        *lock(&self.shared.errors) = None;
        Ok(())
    }

    fn sensor_count(&self) -> usize {
        if self.is_initialized() {
            self.shared.sensors.len()
        } else {
            0
        }
    }

    fn sensor_information_by_index(&self, index: usize) -> Result<SensorInformation> {
        self.ensure_initialized()?;
        self.shared
            .sensors
            .get(index)
            .cloned()
            .ok_or_else(|| error(SensorErrorCode::SensorNotFound, "sensor index"))
    }

    fn sensor_information(&self, handle: SensorHandle) -> Result<SensorInformation> {
        self.ensure_initialized()?;
        self.shared
            .sensors
            .iter()
            .find(|s| s.handle == handle)
            .cloned()
            .ok_or_else(|| error(SensorErrorCode::SensorNotFound, "sensor handle"))
    }

    fn sensor_handle_by_serial_number(&self, serial_number: u64) -> Result<SensorHandle> {
        self.ensure_initialized()?;
        self.shared
            .sensors
            .iter()
            .find(|s| s.serial_number == serial_number)
            .map(|s| s.handle)
            .ok_or_else(|| error(SensorErrorCode::SensorNotFound, "serial number"))
    }

    fn capture_replay(&self) -> &dyn CaptureReplay {
        self
    }
}

impl CaptureReplay for SimulatedSdk {
    fn open(&self, path: &Path) -> Result<()> {
        self.ensure_initialized()?;
        if path.as_os_str().is_empty() {
            return Err(error(SensorErrorCode::InvalidArguments, "capture path"));
        }
        self.stop_replay_feed();

        let mut replay = lock(&self.shared.replay);
        let looping = replay.looping;
        *replay = ReplayState {
            path: Some(path.to_path_buf()),
            looping,
            ..ReplayState::default()
        };
        log::info!("Simulated capture opened: {}", path.display());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.stop_replay_feed();
        let mut replay = lock(&self.shared.replay);
        replay.path = None;
        replay.position_us = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.shared.replay).path.is_some()
    }

    fn is_running(&self) -> bool {
        let replay = lock(&self.shared.replay);
        replay.path.is_some() && replay.running
    }

    fn is_end(&self) -> bool {
        let replay = lock(&self.shared.replay);
        replay.path.is_some() && replay.position_us >= self.shared.length_us()
    }

    fn enable_loop(&self) -> bool {
        lock(&self.shared.replay).looping
    }

    fn set_enable_loop(&self, enabled: bool) -> Result<()> {
        lock(&self.shared.replay).looping = enabled;
        Ok(())
    }

    fn time(&self) -> u64 {
        self.shared.config.capture_start_time + lock(&self.shared.replay).position_us
    }

    fn seek(&self, position: Duration) -> Result<()> {
        let position = position.as_micros() as u64;
        let mut replay = lock(&self.shared.replay);
        if replay.path.is_none() {
            return Err(error(SensorErrorCode::NotOpen, "capture replay"));
        }
        if position > self.shared.length_us() {
            return Err(error(SensorErrorCode::InvalidArguments, "seek past end"));
        }
        replay.position_us = position;
        Ok(())
    }

    fn resume_blocking(&self, duration: Duration) -> Result<()> {
        self.shared.advance_replay(duration)
    }

    fn resume(&self) -> Result<()> {
        {
            let mut replay = lock(&self.shared.replay);
            if replay.path.is_none() {
                return Err(error(SensorErrorCode::NotOpen, "capture replay"));
            }
            if replay.running {
                return Ok(());
            }
            replay.running = true;
        }

        let mut slot = lock(&self.replay_feed);
        if let Some(mut finished) = slot.take() {
            finished.shutdown();
        }
        *slot = Some(Feed::spawn("sim-replay", self.shared.clone(), Shared::step_replay)?);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        if !self.is_open() {
            return Err(error(SensorErrorCode::NotOpen, "capture replay"));
        }
        self.stop_replay_feed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn no_errors() -> ErrorListener {
        Box::new(|_: SensorHandle, _: SensorErrorCode, _: &str| {})
    }

    fn offline_options() -> Options {
        Options {
            control_flags: ControlFlags::DISABLE_NETWORK,
            ..Options::default()
        }
    }

    fn counting_sdk(config: SimulatedConfig) -> (SimulatedSdk, Arc<AtomicUsize>) {
        let sdk = SimulatedSdk::with_config(config);
        sdk.initialize(&offline_options(), no_errors()).unwrap();
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        sdk.listen_image_frames(Box::new(
            move |_: SensorHandle, _: &[SensorImagePoint]| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ))
        .unwrap();
        (sdk, frames)
    }

    #[test]
    fn test_synthetic_frame_shape() {
        let points = synthesize_frame(3, 1_000, 16);
        assert_eq!(points.len(), 16);
        assert!(points.iter().all(|p| p.is_valid()));
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(points.windows(2).all(|w| w[0].image_x < w[1].image_x));
    }

    #[test]
    fn test_lifecycle_errors() {
        let sdk = SimulatedSdk::new();
        assert_eq!(
            sdk.deinitialize().unwrap_err().code(),
            SensorErrorCode::NotInitialized
        );
        sdk.initialize(&offline_options(), no_errors()).unwrap();
        assert_eq!(
            sdk.initialize(&offline_options(), no_errors()).unwrap_err().code(),
            SensorErrorCode::AlreadyInitialized
        );
        assert_eq!(sdk.sensor_count(), 1);
        assert_eq!(sdk.sensor_handle_by_serial_number(1000).unwrap(), 1);
        assert!(sdk.sensor_information(42).is_err());
        sdk.deinitialize().unwrap();
        assert_eq!(sdk.sensor_count(), 0);
    }

    #[test]
    fn test_resume_blocking_emits_crossed_frames() {
        let config = SimulatedConfig {
            capture_length: Duration::from_secs(1),
            ..SimulatedConfig::default()
        };
        let (sdk, frames) = counting_sdk(config);
        sdk.open(Path::new("capture.pcap")).unwrap();

        sdk.resume_blocking(Duration::from_millis(250)).unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert_eq!(sdk.time(), sdk.config().capture_start_time + 250_000);

        sdk.resume_blocking(Duration::from_secs(5)).unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 10);
        assert!(sdk.is_end());

        sdk.resume_blocking(Duration::from_secs(1)).unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_looping_replay_wraps() {
        let config = SimulatedConfig {
            capture_length: Duration::from_millis(500),
            ..SimulatedConfig::default()
        };
        let (sdk, frames) = counting_sdk(config);
        sdk.open(Path::new("capture.pcap")).unwrap();
        sdk.set_enable_loop(true).unwrap();

        sdk.resume_blocking(Duration::from_millis(1200)).unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 12);
        assert!(!sdk.is_end());
    }

    #[test]
    fn test_replay_requires_open_capture() {
        let sdk = SimulatedSdk::new();
        sdk.initialize(&offline_options(), no_errors()).unwrap();
        assert_eq!(
            sdk.resume_blocking(Duration::from_millis(100)).unwrap_err().code(),
            SensorErrorCode::NotOpen
        );
        assert_eq!(sdk.seek(Duration::ZERO).unwrap_err().code(), SensorErrorCode::NotOpen);
        assert_eq!(
            sdk.open(Path::new("")).unwrap_err().code(),
            SensorErrorCode::InvalidArguments
        );
    }

    #[test]
    fn test_resume_runs_until_end() {
        let config = SimulatedConfig {
            frame_period: Duration::from_millis(10),
            capture_length: Duration::from_millis(50),
            ..SimulatedConfig::default()
        };
        let (sdk, frames) = counting_sdk(config);
        sdk.open(Path::new("capture.pcap")).unwrap();
        sdk.resume().unwrap();
        assert!(sdk.is_running());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sdk.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!sdk.is_running());
        assert!(sdk.is_end());
        assert_eq!(frames.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_live_feed_delivers_frames_and_packets() {
        let config = SimulatedConfig {
            frame_period: Duration::from_millis(10),
            sensor_count: 2,
            ..SimulatedConfig::default()
        };
        let sdk = SimulatedSdk::with_config(config);
        sdk.initialize(&Options::default(), no_errors()).unwrap();

        let packets = Arc::new(AtomicUsize::new(0));
        let counter = packets.clone();
        sdk.listen_network_packets(Box::new(
            move |_: SensorHandle, _: i64, buffer: &[u8]| {
                assert_eq!(buffer.len(), 64 * 12);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ))
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while packets.load(Ordering::SeqCst) < 4 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        sdk.deinitialize().unwrap();
        assert!(packets.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn test_injected_errors_reach_both_handlers() {
        let sdk = SimulatedSdk::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let on_error = hits.clone();
        sdk.initialize(
            &offline_options(),
            Box::new(move |_: SensorHandle, _: SensorErrorCode, _: &str| {
                on_error.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let listener = hits.clone();
        sdk.listen_errors(Box::new(move |_: SensorHandle, code: SensorErrorCode, _: &str| {
            assert_eq!(code, SensorErrorCode::FaultAbnormalFov);
            listener.fetch_add(10, Ordering::SeqCst);
        }))
        .unwrap();

        sdk.inject_error(1, SensorErrorCode::FaultAbnormalFov, "fov");
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }
}
