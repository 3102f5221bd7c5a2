//! Error types for wavecycle-out
//!
//! The public engine contract reports failures as an [`ErrorCode`] read back
//! through `OutputEngine::last_error()`. Device adapters and format validation
//! use richer thiserror types internally; each converts to exactly one code.

use thiserror::Error;

/// Last-observed failure reason of an output engine.
///
/// One code is active at a time. It is overwritten by each failing operation
/// and never cleared automatically.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ErrorCode {
    /// No failure recorded
    #[default]
    #[error("no error")]
    Ok = 0,

    /// `open` called while a session is active
    #[error("output engine already open")]
    AlreadyOpen,

    /// Wave format failed validation
    #[error("invalid wave format")]
    InvalidFormat,

    /// Render worker did not exit in time and was force-stopped
    #[error("render worker force-stopped")]
    ThreadAbort,

    /// Device adapter could not open the output device
    #[error("failed to open output device")]
    DeviceOpenFailed,

    /// Render worker thread could not be spawned
    #[error("failed to create render worker")]
    ThreadCreateFailed,

    /// Completion signal could not be set up
    #[error("failed to create completion signal")]
    SignalCreateFailed,

    /// Device adapter failed to close the device
    #[error("failed to close output device")]
    DeviceCloseFailed,

    /// Submitting a slot to the device failed
    #[error("failed to submit buffer to device")]
    DeviceWriteFailed,

    /// Reclaiming a slot from the device failed
    #[error("failed to reclaim buffer from device")]
    DevicePrepareFailed,

    /// Completion signal could not be released
    #[error("failed to release completion signal")]
    HandleCloseFailed,
}

impl ErrorCode {
    /// Numeric value of the code
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Inverse of [`ErrorCode::as_u32`]
    pub fn from_u32(value: u32) -> Option<Self> {
        use ErrorCode::*;
        const ALL: [ErrorCode; 11] = [
            Ok,
            AlreadyOpen,
            InvalidFormat,
            ThreadAbort,
            DeviceOpenFailed,
            ThreadCreateFailed,
            SignalCreateFailed,
            DeviceCloseFailed,
            DeviceWriteFailed,
            DevicePrepareFailed,
            HandleCloseFailed,
        ];
        ALL.get(value as usize).copied()
    }
}

/// Failure reported by a device adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Device could not be opened with the requested format
    #[error("Device open failed: {0}")]
    Open(String),

    /// Completion signal could not be created
    #[error("Completion signal setup failed: {0}")]
    Signal(String),

    /// Slot could not be handed to the device
    #[error("Submit of slot {slot} failed: {reason}")]
    Submit { slot: usize, reason: String },

    /// Slot could not be taken back from the device
    #[error("Reclaim of slot {slot} failed: {reason}")]
    Reclaim { slot: usize, reason: String },

    /// Device could not be closed
    #[error("Device close failed: {0}")]
    Close(String),

    /// Completion signal could not be released after the device closed
    #[error("Completion signal release failed: {0}")]
    SignalRelease(String),
}

impl DeviceError {
    /// Engine error code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            DeviceError::Open(_) => ErrorCode::DeviceOpenFailed,
            DeviceError::Signal(_) => ErrorCode::SignalCreateFailed,
            DeviceError::Submit { .. } => ErrorCode::DeviceWriteFailed,
            DeviceError::Reclaim { .. } => ErrorCode::DevicePrepareFailed,
            DeviceError::Close(_) => ErrorCode::DeviceCloseFailed,
            DeviceError::SignalRelease(_) => ErrorCode::HandleCloseFailed,
        }
    }
}

impl From<DeviceError> for ErrorCode {
    fn from(err: DeviceError) -> Self {
        err.code()
    }
}

/// Wave format validation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("buffer size {0} frames is not a power of two")]
    BufferNotPowerOfTwo(u32),

    #[error("no renderer set")]
    MissingRenderer,

    #[error("unsupported bit depth {0} (expected 8 or 16)")]
    UnsupportedBitDepth(u16),

    #[error("unsupported sample rate {0} Hz (expected 11025, 22050 or 44100)")]
    UnsupportedSampleRate(u32),

    #[error("unsupported channel count {0} (expected 1 or 2)")]
    UnsupportedChannels(u16),

    #[error("buffer of {bytes} bytes is too small for {slots} aligned slots")]
    BufferTooSmall { bytes: usize, slots: usize },

    #[error("buffer size overflows the address space")]
    BufferTooLarge,
}

impl From<FormatError> for ErrorCode {
    fn from(_: FormatError) -> Self {
        ErrorCode::InvalidFormat
    }
}

/// Convenience Result type for device adapters
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
