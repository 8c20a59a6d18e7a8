use std::fmt;

/// Status codes reported by the sensor SDK.
///
/// Negative codes above the fault range are errors and abort the operation that
/// triggered them. Faults (`-1000` and below) describe sensor conditions and are
/// recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorErrorCode {
    Success,
    Generic,
    OutOfMemory,
    SensorNotFound,
    SdkVersionMismatch,
    Communication,
    TooManyCallbacks,
    InvalidArguments,
    AlreadyInitialized,
    NotInitialized,
    InvalidFileType,
    FileIo,
    CorruptFile,
    NotOpen,
    Eof,
    NotSupported,
    InvalidResponse,
    VirtualMemory,
    Timeout,
    FaultInternal,
    FaultExtremeTemperature,
    FaultExtremeHumidity,
    FaultExtremeAcceleration,
    FaultAbnormalFov,
    FaultAbnormalFrameRate,
    FaultMotorMalfunction,
    FaultLaserMalfunction,
    FaultDetectorMalfunction,
    /// A code this crate does not know about.
    Other(i32),
}

const FAULT_THRESHOLD: i32 = -1000;

impl SensorErrorCode {
    pub fn from_raw(code: i32) -> Self {
        use SensorErrorCode::*;
        match code {
            0 => Success,
            -1 => Generic,
            -2 => OutOfMemory,
            -4 => SensorNotFound,
            -5 => SdkVersionMismatch,
            -6 => Communication,
            -7 => TooManyCallbacks,
            -8 => InvalidArguments,
            -9 => AlreadyInitialized,
            -10 => NotInitialized,
            -11 => InvalidFileType,
            -12 => FileIo,
            -13 => CorruptFile,
            -14 => NotOpen,
            -15 => Eof,
            -16 => NotSupported,
            -17 => InvalidResponse,
            -18 => VirtualMemory,
            -19 => Timeout,
            -1000 => FaultInternal,
            -1001 => FaultExtremeTemperature,
            -1002 => FaultExtremeHumidity,
            -1003 => FaultExtremeAcceleration,
            -1004 => FaultAbnormalFov,
            -1005 => FaultAbnormalFrameRate,
            -1006 => FaultMotorMalfunction,
            -1007 => FaultLaserMalfunction,
            -1008 => FaultDetectorMalfunction,
            other => Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        use SensorErrorCode::*;
        match self {
            Success => 0,
            Generic => -1,
            OutOfMemory => -2,
            SensorNotFound => -4,
            SdkVersionMismatch => -5,
            Communication => -6,
            TooManyCallbacks => -7,
            InvalidArguments => -8,
            AlreadyInitialized => -9,
            NotInitialized => -10,
            InvalidFileType => -11,
            FileIo => -12,
            CorruptFile => -13,
            NotOpen => -14,
            Eof => -15,
            NotSupported => -16,
            InvalidResponse => -17,
            VirtualMemory => -18,
            Timeout => -19,
            FaultInternal => -1000,
            FaultExtremeTemperature => -1001,
            FaultExtremeHumidity => -1002,
            FaultExtremeAcceleration => -1003,
            FaultAbnormalFov => -1004,
            FaultAbnormalFrameRate => -1005,
            FaultMotorMalfunction => -1006,
            FaultLaserMalfunction => -1007,
            FaultDetectorMalfunction => -1008,
            Other(code) => code,
        }
    }

    /// Symbolic name, e.g. `CEPTON_ERROR_NOT_OPEN`.
    pub fn name(self) -> &'static str {
        use SensorErrorCode::*;
        match self {
            Success => "CEPTON_SUCCESS",
            Generic => "CEPTON_ERROR_GENERIC",
            OutOfMemory => "CEPTON_ERROR_OUT_OF_MEMORY",
            SensorNotFound => "CEPTON_ERROR_SENSOR_NOT_FOUND",
            SdkVersionMismatch => "CEPTON_ERROR_SDK_VERSION_MISMATCH",
            Communication => "CEPTON_ERROR_COMMUNICATION",
            TooManyCallbacks => "CEPTON_ERROR_TOO_MANY_CALLBACKS",
            InvalidArguments => "CEPTON_ERROR_INVALID_ARGUMENTS",
            AlreadyInitialized => "CEPTON_ERROR_ALREADY_INITIALIZED",
            NotInitialized => "CEPTON_ERROR_NOT_INITIALIZED",
            InvalidFileType => "CEPTON_ERROR_INVALID_FILE_TYPE",
            FileIo => "CEPTON_ERROR_FILE_IO",
            CorruptFile => "CEPTON_ERROR_CORRUPT_FILE",
            NotOpen => "CEPTON_ERROR_NOT_OPEN",
            Eof => "CEPTON_ERROR_EOF",
            NotSupported => "CEPTON_ERROR_NOT_SUPPORTED",
            InvalidResponse => "CEPTON_ERROR_INVALID_RESPONSE",
            VirtualMemory => "CEPTON_ERROR_VIRTUAL_MEMORY",
            Timeout => "CEPTON_ERROR_TIMEOUT",
            FaultInternal => "CEPTON_FAULT_INTERNAL",
            FaultExtremeTemperature => "CEPTON_FAULT_EXTREME_TEMPERATURE",
            FaultExtremeHumidity => "CEPTON_FAULT_EXTREME_HUMIDITY",
            FaultExtremeAcceleration => "CEPTON_FAULT_EXTREME_ACCELERATION",
            FaultAbnormalFov => "CEPTON_FAULT_ABNORMAL_FOV",
            FaultAbnormalFrameRate => "CEPTON_FAULT_ABNORMAL_FRAME_RATE",
            FaultMotorMalfunction => "CEPTON_FAULT_MOTOR_MALFUNCTION",
            FaultLaserMalfunction => "CEPTON_FAULT_LASER_MALFUNCTION",
            FaultDetectorMalfunction => "CEPTON_FAULT_DETECTOR_MALFUNCTION",
            Other(_) => "CEPTON_ERROR_UNKNOWN",
        }
    }

    pub fn is_success(self) -> bool {
        self.raw() == 0
    }

    /// Sensor fault: logged, execution continues.
    pub fn is_fault(self) -> bool {
        self.raw() <= FAULT_THRESHOLD
    }

    /// Fatal error: the triggering operation must be aborted.
    pub fn is_error(self) -> bool {
        let raw = self.raw();
        raw < 0 && raw > FAULT_THRESHOLD
    }
}

impl fmt::Display for SensorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorErrorCode::Other(code) => write!(f, "{} ({})", self.name(), code),
            _ => f.write_str(self.name()),
        }
    }
}

/// An error or fault reported by the SDK, with an optional human message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}: {code}")]
pub struct SensorError {
    code: SensorErrorCode,
    message: String,
}

impl SensorError {
    pub fn new(code: SensorErrorCode, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message.push_str("SDK Error");
        }
        Self { code, message }
    }

    pub fn from_code(code: SensorErrorCode) -> Self {
        Self::new(code, "")
    }

    /// Convert a raw SDK status into a `Result`.
    pub fn check(code: i32) -> crate::Result<()> {
        match SensorErrorCode::from_raw(code) {
            SensorErrorCode::Success => Ok(()),
            code => Err(Self::from_code(code)),
        }
    }

    pub fn code(&self) -> SensorErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.code.is_error()
    }
}

/// Level [`log_error`] reports `error` at. `None` for success codes.
fn log_level(error: &SensorError) -> Option<log::Level> {
    if error.code().is_success() {
        None
    } else if error.is_fatal() {
        Some(log::Level::Error)
    } else {
        Some(log::Level::Warn)
    }
}

/// Log an SDK error. Fatal errors go to `error!`, faults to `warn!`. Success
/// codes are not logged.
pub fn log_error(error: &SensorError, msg: &str) {
    let Some(level) = log_level(error) else {
        return;
    };
    if msg.is_empty() {
        log::log!(level, "{}", error);
    } else {
        log::log!(level, "{} <{}>", msg, error);
    }
}

/// Strict counterpart of [`log_error`]: fatal errors are returned to the caller,
/// non-fatal ones are logged.
pub fn check_error(error: &SensorError, msg: &str) -> crate::Result<()> {
    if error.is_fatal() {
        return Err(error.clone());
    }
    log_error(error, msg);
    Ok(())
}

/// Log the error held by `result`, if any, and pass the result through.
pub fn log_result<T>(result: crate::Result<T>, msg: &str) -> crate::Result<T> {
    if let Err(e) = &result {
        log_error(e, msg);
    }
    result
}
