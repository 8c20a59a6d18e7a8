//! Native binding to the Cepton SDK shared library.
//!
//! Enabled with the `cepton-sdk` feature. Set `CEPTON_SDK_LIB_DIR` to the
//! directory holding `libcepton_sdk` when building.
//!
//! The C library takes one function pointer plus a `user_data` pointer per
//! event type. [`CeptonSdk`] keeps the Rust listeners in a boxed [`Slots`]
//! whose address is passed as `user_data`, so the trampolines below can find
//! them again on the SDK thread.

use crate::error::{SensorError, SensorErrorCode};
use crate::sdk::{CaptureReplay, ErrorListener, ImageFrameListener, NetworkPacketListener, SensorSdk};
use crate::types::{ControlFlags, FrameMode, Options, SensorHandle, SensorImagePoint, SensorInformation};
use crate::Result;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// API version this binding was written against.
const SDK_VERSION: c_int = 18;

const FLAG_MOCK: u32 = 1 << 0;

type CeptonErrorCode = c_int;

type FpErrorCallback = unsafe extern "C" fn(
    handle: SensorHandle,
    code: CeptonErrorCode,
    message: *const c_char,
    data: *const c_void,
    data_size: usize,
    user_data: *mut c_void,
);

type FpImageDataCallback = unsafe extern "C" fn(
    handle: SensorHandle,
    n_points: usize,
    points: *const SensorImagePoint,
    user_data: *mut c_void,
);

type FpNetworkCallback = unsafe extern "C" fn(
    handle: SensorHandle,
    timestamp: i64,
    buffer: *const u8,
    buffer_size: usize,
    user_data: *mut c_void,
);

#[repr(C)]
#[allow(dead_code)]
struct RawFrameOptions {
    signature: usize,
    mode: FrameMode,
    length: f32,
}

#[repr(C)]
#[allow(dead_code)]
struct RawOptions {
    signature: usize,
    control_flags: ControlFlags,
    frame: RawFrameOptions,
    port: u16,
}

/// Leading fields of `CeptonSensorInformation`. The tail is reserved space
/// so the library can write the full struct.
#[repr(C)]
#[allow(dead_code)]
struct RawSensorInformation {
    handle: SensorHandle,
    serial_number: u64,
    model_name: [c_char; 28],
    model: u16,
    reserved: u16,
    firmware_version: [c_char; 32],
    formal_firmware_version: [u8; 4],
    last_reported_temperature: f32,
    last_reported_humidity: f32,
    last_reported_age: f32,
    measurement_period: f32,
    ptp_ts: i64,
    gps_ts: [u8; 6],
    return_count: u8,
    segment_count: u8,
    flags: u32,
    tail: [u8; 256],
}

#[link(name = "cepton_sdk")]
extern "C" {
    fn cepton_sdk_create_options() -> RawOptions;
    fn cepton_sdk_initialize(
        version: c_int,
        options: *const RawOptions,
        cb: FpErrorCallback,
        user_data: *mut c_void,
    ) -> CeptonErrorCode;
    fn cepton_sdk_deinitialize() -> CeptonErrorCode;
    fn cepton_sdk_is_initialized() -> c_int;

    fn cepton_sdk_listen_image_frames(cb: FpImageDataCallback, user_data: *mut c_void) -> CeptonErrorCode;
    fn cepton_sdk_unlisten_image_frames() -> CeptonErrorCode;
    fn cepton_sdk_listen_network_packet(cb: FpNetworkCallback, user_data: *mut c_void) -> CeptonErrorCode;
    fn cepton_sdk_unlisten_network_packet() -> CeptonErrorCode;

    fn cepton_sdk_get_n_sensors() -> usize;
    fn cepton_sdk_get_sensor_handle_by_serial_number(
        serial_number: u64,
        handle: *mut SensorHandle,
    ) -> CeptonErrorCode;
    fn cepton_sdk_get_sensor_information_by_index(
        index: usize,
        info: *mut RawSensorInformation,
    ) -> CeptonErrorCode;
    fn cepton_sdk_get_sensor_information(
        handle: SensorHandle,
        info: *mut RawSensorInformation,
    ) -> CeptonErrorCode;

    fn cepton_sdk_capture_replay_is_open() -> c_int;
    fn cepton_sdk_capture_replay_open(path: *const c_char) -> CeptonErrorCode;
    fn cepton_sdk_capture_replay_close() -> CeptonErrorCode;
    fn cepton_sdk_capture_replay_get_start_time() -> u64;
    fn cepton_sdk_capture_replay_get_position() -> f32;
    fn cepton_sdk_capture_replay_get_length() -> f32;
    fn cepton_sdk_capture_replay_is_end() -> c_int;
    fn cepton_sdk_capture_replay_seek(position: f32) -> CeptonErrorCode;
    fn cepton_sdk_capture_replay_set_enable_loop(enable_loop: c_int) -> CeptonErrorCode;
    fn cepton_sdk_capture_replay_get_enable_loop() -> c_int;
    fn cepton_sdk_capture_replay_is_running() -> c_int;
    fn cepton_sdk_capture_replay_resume_blocking(duration: f32) -> CeptonErrorCode;
    fn cepton_sdk_capture_replay_resume() -> CeptonErrorCode;
    fn cepton_sdk_capture_replay_pause() -> CeptonErrorCode;
}

#[derive(Default)]
struct Slots {
    on_error: Mutex<Option<ErrorListener>>,
    errors: Mutex<Option<ErrorListener>>,
    image_frames: Mutex<Option<ImageFrameListener>>,
    network_packets: Mutex<Option<NetworkPacketListener>>,
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # Safety
/// `user_data` must be the `Slots` pointer registered by [`CeptonSdk`].
unsafe extern "C" fn on_error_trampoline(
    handle: SensorHandle,
    code: CeptonErrorCode,
    message: *const c_char,
    _data: *const c_void,
    _data_size: usize,
    user_data: *mut c_void,
) {
    let slots = &*(user_data as *const Slots);
    let message = if message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(message).to_string_lossy().into_owned()
    };
    let code = SensorErrorCode::from_raw(code);
    for slot in [&slots.on_error, &slots.errors] {
        if let Some(listener) = lock(slot).as_ref() {
            listener(handle, code, &message);
        }
    }
}

/// # Safety
/// `points` must reference `n_points` image points. `user_data` as above.
unsafe extern "C" fn image_frames_trampoline(
    handle: SensorHandle,
    n_points: usize,
    points: *const SensorImagePoint,
    user_data: *mut c_void,
) {
    let slots = &*(user_data as *const Slots);
    let points: &[SensorImagePoint] = if points.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(points, n_points)
    };
    if let Some(listener) = lock(&slots.image_frames).as_ref() {
        listener(handle, points);
    }
}

/// # Safety
/// `buffer` must reference `buffer_size` bytes. `user_data` as above.
unsafe extern "C" fn network_packet_trampoline(
    handle: SensorHandle,
    timestamp: i64,
    buffer: *const u8,
    buffer_size: usize,
    user_data: *mut c_void,
) {
    let slots = &*(user_data as *const Slots);
    let buffer: &[u8] = if buffer.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(buffer, buffer_size)
    };
    if let Some(listener) = lock(&slots.network_packets).as_ref() {
        listener(handle, timestamp, buffer);
    }
}

fn c_char_to_string(buf: &[c_char]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    let bytes: Vec<u8> = buf[..end].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn empty_information() -> RawSensorInformation {
    RawSensorInformation {
        handle: 0,
        serial_number: 0,
        model_name: [0; 28],
        model: 0,
        reserved: 0,
        firmware_version: [0; 32],
        formal_firmware_version: [0; 4],
        last_reported_temperature: 0.0,
        last_reported_humidity: 0.0,
        last_reported_age: 0.0,
        measurement_period: 0.0,
        ptp_ts: 0,
        gps_ts: [0; 6],
        return_count: 0,
        segment_count: 0,
        flags: 0,
        tail: [0; 256],
    }
}

fn sensor_information_from_raw(raw: &RawSensorInformation) -> SensorInformation {
    SensorInformation {
        handle: raw.handle,
        serial_number: raw.serial_number,
        model_name: c_char_to_string(&raw.model_name),
        firmware_version: c_char_to_string(&raw.firmware_version),
        last_reported_temperature: raw.last_reported_temperature,
        return_count: raw.return_count,
        is_mocked: raw.flags & FLAG_MOCK != 0,
    }
}

fn flag(value: c_int) -> bool {
    value != 0
}

/// [`SensorSdk`] backed by the vendor library.
///
/// The library is process-global; create at most one `CeptonSdk`.
pub struct CeptonSdk {
    slots: Box<Slots>,
    replay: NativeReplay,
}

impl CeptonSdk {
    pub fn new() -> Self {
        Self {
            slots: Box::default(),
            replay: NativeReplay,
        }
    }

    fn user_data(&self) -> *mut c_void {
        &*self.slots as *const Slots as *mut c_void
    }
}

impl Default for CeptonSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSdk for CeptonSdk {
    fn initialize(&self, options: &Options, on_error: ErrorListener) -> Result<()> {
        if self.is_initialized() {
            return Err(SensorError::from_code(SensorErrorCode::AlreadyInitialized));
        }
        *lock(&self.slots.on_error) = Some(on_error);

        // SAFETY: plain value returned by the library.
        let mut raw = unsafe { cepton_sdk_create_options() };
        raw.control_flags = options.control_flags;
        raw.frame.mode = options.frame.mode;
        raw.frame.length = options.frame.length.as_secs_f32();
        raw.port = options.port;

        log::info!("Initializing Cepton SDK (port {})", options.port);
        // SAFETY: `raw` outlives the call and `slots` outlives the library
        // registration, which ends in `deinitialize`.
        let code = unsafe {
            cepton_sdk_initialize(SDK_VERSION, &raw, on_error_trampoline, self.user_data())
        };
        let result = SensorError::check(code);
        if result.is_err() {
            lock(&self.slots.on_error).take();
        }
        result
    }

    fn deinitialize(&self) -> Result<()> {
        // SAFETY: no arguments.
        let result = SensorError::check(unsafe { cepton_sdk_deinitialize() });
        lock(&self.slots.on_error).take();
        lock(&self.slots.errors).take();
        lock(&self.slots.image_frames).take();
        lock(&self.slots.network_packets).take();
        result
    }

    fn is_initialized(&self) -> bool {
        // SAFETY: no arguments.
        flag(unsafe { cepton_sdk_is_initialized() })
    }

    fn listen_image_frames(&self, listener: ImageFrameListener) -> Result<()> {
        let mut slot = lock(&self.slots.image_frames);
        if slot.is_some() {
            return Err(SensorError::from_code(SensorErrorCode::TooManyCallbacks));
        }
        // SAFETY: `slots` outlives the registration.
        SensorError::check(unsafe {
            cepton_sdk_listen_image_frames(image_frames_trampoline, self.user_data())
        })?;
        *slot = Some(listener);
        Ok(())
    }

    fn unlisten_image_frames(&self) -> Result<()> {
        // SAFETY: no arguments.
        let result = SensorError::check(unsafe { cepton_sdk_unlisten_image_frames() });
        lock(&self.slots.image_frames).take();
        result
    }

    fn listen_network_packets(&self, listener: NetworkPacketListener) -> Result<()> {
        let mut slot = lock(&self.slots.network_packets);
        if slot.is_some() {
            return Err(SensorError::from_code(SensorErrorCode::TooManyCallbacks));
        }
        // SAFETY: `slots` outlives the registration.
        SensorError::check(unsafe {
            cepton_sdk_listen_network_packet(network_packet_trampoline, self.user_data())
        })?;
        *slot = Some(listener);
        Ok(())
    }

    fn unlisten_network_packets(&self) -> Result<()> {
        // SAFETY: no arguments.
        let result = SensorError::check(unsafe { cepton_sdk_unlisten_network_packet() });
        lock(&self.slots.network_packets).take();
        result
    }

    fn listen_errors(&self, listener: ErrorListener) -> Result<()> {
        let mut slot = lock(&self.slots.errors);
        if slot.is_some() {
            return Err(SensorError::from_code(SensorErrorCode::TooManyCallbacks));
        }
        *slot = Some(listener);
        Ok(())
    }

    fn unlisten_errors(&self) -> Result<()> {
        lock(&self.slots.errors).take();
        Ok(())
    }

    fn sensor_count(&self) -> usize {
        // SAFETY: no arguments.
        unsafe { cepton_sdk_get_n_sensors() }
    }

    fn sensor_information_by_index(&self, index: usize) -> Result<SensorInformation> {
        let mut raw = empty_information();
        // SAFETY: `raw` is writable and larger than the library struct.
        SensorError::check(unsafe { cepton_sdk_get_sensor_information_by_index(index, &mut raw) })?;
        Ok(sensor_information_from_raw(&raw))
    }

    fn sensor_information(&self, handle: SensorHandle) -> Result<SensorInformation> {
        let mut raw = empty_information();
        // SAFETY: as above.
        SensorError::check(unsafe { cepton_sdk_get_sensor_information(handle, &mut raw) })?;
        Ok(sensor_information_from_raw(&raw))
    }

    fn sensor_handle_by_serial_number(&self, serial_number: u64) -> Result<SensorHandle> {
        let mut handle: SensorHandle = 0;
        // SAFETY: `handle` is a valid out pointer.
        SensorError::check(unsafe {
            cepton_sdk_get_sensor_handle_by_serial_number(serial_number, &mut handle)
        })?;
        Ok(handle)
    }

    fn capture_replay(&self) -> &dyn CaptureReplay {
        &self.replay
    }
}

impl Drop for CeptonSdk {
    fn drop(&mut self) {
        // The library must stop calling into `slots` before they are freed.
        if self.is_initialized() {
            if let Err(e) = SensorSdk::deinitialize(self) {
                log::warn!("Failed to deinitialize Cepton SDK on drop: {}", e);
            }
        }
    }
}

/// Capture replay controls of the vendor library.
struct NativeReplay;

impl CaptureReplay for NativeReplay {
    fn open(&self, path: &Path) -> Result<()> {
        let path = CString::new(path.to_string_lossy().into_owned())
            .map_err(|_| SensorError::new(SensorErrorCode::InvalidArguments, "Path contains NUL"))?;
        log::info!("Opening capture {:?}", path);
        // SAFETY: `path` is NUL terminated and outlives the call.
        SensorError::check(unsafe { cepton_sdk_capture_replay_open(path.as_ptr()) })
    }

    fn close(&self) -> Result<()> {
        // SAFETY: no arguments.
        SensorError::check(unsafe { cepton_sdk_capture_replay_close() })
    }

    fn is_open(&self) -> bool {
        // SAFETY: no arguments.
        flag(unsafe { cepton_sdk_capture_replay_is_open() })
    }

    fn is_running(&self) -> bool {
        // SAFETY: no arguments.
        flag(unsafe { cepton_sdk_capture_replay_is_running() })
    }

    fn is_end(&self) -> bool {
        // SAFETY: no arguments.
        flag(unsafe { cepton_sdk_capture_replay_is_end() })
    }

    fn enable_loop(&self) -> bool {
        // SAFETY: no arguments.
        flag(unsafe { cepton_sdk_capture_replay_get_enable_loop() })
    }

    fn set_enable_loop(&self, enabled: bool) -> Result<()> {
        // SAFETY: plain value argument.
        SensorError::check(unsafe { cepton_sdk_capture_replay_set_enable_loop(c_int::from(enabled)) })
    }

    fn time(&self) -> u64 {
        // SAFETY: no arguments.
        let (start, position) = unsafe {
            (
                cepton_sdk_capture_replay_get_start_time(),
                cepton_sdk_capture_replay_get_position(),
            )
        };
        start + (f64::from(position) * 1e6) as u64
    }

    fn seek(&self, position: Duration) -> Result<()> {
        // SAFETY: no arguments.
        let length = unsafe { cepton_sdk_capture_replay_get_length() };
        if position.as_secs_f32() > length {
            return Err(SensorError::new(
                SensorErrorCode::InvalidArguments,
                format!("Seek past end of capture ({:.3}s)", length),
            ));
        }
        // SAFETY: plain value argument.
        SensorError::check(unsafe { cepton_sdk_capture_replay_seek(position.as_secs_f32()) })
    }

    fn resume_blocking(&self, duration: Duration) -> Result<()> {
        // SAFETY: plain value argument.
        SensorError::check(unsafe { cepton_sdk_capture_replay_resume_blocking(duration.as_secs_f32()) })
    }

    fn resume(&self) -> Result<()> {
        // SAFETY: no arguments.
        SensorError::check(unsafe { cepton_sdk_capture_replay_resume() })
    }

    fn pause(&self) -> Result<()> {
        // SAFETY: no arguments.
        SensorError::check(unsafe { cepton_sdk_capture_replay_pause() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_char_to_string_stops_at_nul() {
        let mut buf = [0 as c_char; 8];
        for (i, b) in b"VISTA".iter().enumerate() {
            buf[i] = *b as c_char;
        }
        assert_eq!(c_char_to_string(&buf), "VISTA");

        let full = [b'x' as c_char; 4];
        assert_eq!(c_char_to_string(&full), "xxxx");
    }

    #[test]
    fn test_sensor_information_conversion() {
        let mut raw = empty_information();
        raw.handle = 7;
        raw.serial_number = 12345;
        raw.model_name[0] = b'V' as c_char;
        raw.return_count = 2;
        raw.flags = FLAG_MOCK;

        let info = sensor_information_from_raw(&raw);
        assert_eq!(info.handle, 7);
        assert_eq!(info.serial_number, 12345);
        assert_eq!(info.model_name, "V");
        assert_eq!(info.return_count, 2);
        assert!(info.is_mocked);
    }
}
