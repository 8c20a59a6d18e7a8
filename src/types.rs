use std::time::Duration;

/// Opaque sensor handle assigned by the SDK.
pub type SensorHandle = u64;

/// Detection as reported by the SDK, before Cartesian conversion.
///
/// Layout matches `CeptonSensorImagePoint` so native frames can be borrowed
/// without copying.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorImagePoint {
    /// Unix timestamp in microseconds.
    pub timestamp: i64,
    /// Horizontal tangent of the ray.
    pub image_x: f32,
    /// Range in meters.
    pub distance: f32,
    /// Vertical tangent of the ray.
    pub image_z: f32,
    /// Diffuse reflectivity [0..1].
    pub intensity: f32,
    pub return_type: u8,
    pub flags: ImagePointFlags,
    pub reserved: [u8; 2],
}

bitflags::bitflags! {
    /// Per-point status bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ImagePointFlags: u8 {
        const VALID     = 1 << 0;
        const SATURATED = 1 << 1;
    }
}

impl SensorImagePoint {
    pub fn is_valid(&self) -> bool {
        self.flags.contains(ImagePointFlags::VALID)
    }

    pub fn is_saturated(&self) -> bool {
        self.flags.contains(ImagePointFlags::SATURATED)
    }
}

/// Cartesian point produced from a [`SensorImagePoint`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorPoint {
    /// Unix timestamp in microseconds.
    pub timestamp: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
    pub return_number: u8,
    pub valid: bool,
    pub saturated: bool,
}

/// Size of one binary point record written by [`SensorPoint::to_le_bytes`].
pub const SENSOR_POINT_RECORD_SIZE: usize = 32;

impl SensorPoint {
    /// Fixed-size little-endian record.
    ///
    /// Layout: `[0..8]` timestamp, `[8..24]` x/y/z/intensity as f32,
    /// `[24]` return number, `[25]` valid, `[26]` saturated, `[27..32]` padding.
    pub fn to_le_bytes(&self) -> [u8; SENSOR_POINT_RECORD_SIZE] {
        let mut buf = [0u8; SENSOR_POINT_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..12].copy_from_slice(&self.x.to_le_bytes());
        buf[12..16].copy_from_slice(&self.y.to_le_bytes());
        buf[16..20].copy_from_slice(&self.z.to_le_bytes());
        buf[20..24].copy_from_slice(&self.intensity.to_le_bytes());
        buf[24] = self.return_number;
        buf[25] = self.valid as u8;
        buf[26] = self.saturated as u8;
        buf
    }
}

/// Sensor identification as reported by the SDK.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInformation {
    pub handle: SensorHandle,
    pub serial_number: u64,
    pub model_name: String,
    pub firmware_version: String,
    /// Celsius.
    pub last_reported_temperature: f32,
    pub return_count: u8,
    pub is_mocked: bool,
}

bitflags::bitflags! {
    /// SDK control flags passed at initialization.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[repr(C)]
    pub struct ControlFlags: u32 {
        /// Do not listen on the network. Set automatically for capture replay.
        const DISABLE_NETWORK         = 1 << 1;
        const DISABLE_IMAGE_CLIP      = 1 << 2;
        const DISABLE_DISTANCE_CLIP   = 1 << 3;
        const ENABLE_MULTIPLE_RETURNS = 1 << 4;
        const ENABLE_STRAY_FILTER     = 1 << 5;
        const HOST_TIMESTAMPS         = 1 << 6;
    }
}

/// How the SDK groups points into frames.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameMode {
    /// Deliver points as soon as they are decoded.
    #[default]
    Streaming = 0,
    /// Deliver a frame every `FrameOptions::length`.
    Timed = 1,
    /// Deliver a frame once the scan covers the field of view.
    Cover = 2,
    /// Deliver a frame per full scan cycle.
    Cycle = 3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOptions {
    pub mode: FrameMode,
    /// Only used by [`FrameMode::Timed`].
    pub length: Duration,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            mode: FrameMode::Streaming,
            length: Duration::from_millis(100),
        }
    }
}

/// SDK initialization options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Options {
    pub control_flags: ControlFlags,
    pub frame: FrameOptions,
    /// UDP port sensors broadcast on.
    pub port: u16,
}

pub const DEFAULT_PORT: u16 = 8808;

impl Default for Options {
    fn default() -> Self {
        Self {
            control_flags: ControlFlags::empty(),
            frame: FrameOptions::default(),
            port: DEFAULT_PORT,
        }
    }
}
