//! # Error Types
//!
//! Custom error types for dshot-gpio using `thiserror`.
//!
//! Each stage of a transmit request has its own error enum so callers can
//! match on exactly the failures that stage can produce. [`DshotError`] wraps
//! them all for the facade and the binary.

use std::io;
use thiserror::Error;

/// Frame encoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Throttle command outside the 11-bit DShot range
    #[error("command {0} is outside the DShot range 0-2047")]
    InvalidCommandRange(i64),
}

/// Pin control errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    /// Pin is not one of the lines the host exposes
    #[error("GPIO {pin} is not available (host exposes GPIO 0-{})", .pin_count.saturating_sub(1))]
    InvalidPin { pin: u32, pin_count: u32 },

    /// Register window is not mapped
    #[error("GPIO registers are not mapped")]
    NotInitialized,
}

/// Hardware initialization errors
#[derive(Debug, Error)]
pub enum InitError {
    /// Caller lacks the privilege to map device memory
    #[error("permission denied opening {0} (run as root or join the gpio group)")]
    PermissionDenied(String),

    /// GPIO device node or register block is absent
    #[error("GPIO device not found: {0}")]
    DeviceNotFound(String),

    /// Any other I/O failure while mapping
    #[error("I/O error mapping GPIO registers: {0}")]
    Io(#[from] io::Error),
}

impl InitError {
    /// Classify an I/O error raised while opening or mapping `path`
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => InitError::PermissionDenied(path.to_string()),
            io::ErrorKind::NotFound => InitError::DeviceNotFound(path.to_string()),
            _ => InitError::Io(err),
        }
    }
}

/// Frame transmission errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmitError {
    /// Send attempted before the register window was mapped
    #[error("GPIO hardware unavailable (not initialized)")]
    HardwareUnavailable,

    /// Pin rejected by the GPIO layer
    #[error(transparent)]
    Pin(#[from] PinError),
}

/// Main error type for dshot-gpio
#[derive(Debug, Error)]
pub enum DshotError {
    /// Frame encoding errors
    #[error("DShot encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Hardware initialization errors
    #[error("GPIO init error: {0}")]
    Init(#[from] InitError),

    /// Transmission errors
    #[error("DShot transmit error: {0}")]
    Transmit(#[from] TransmitError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for dshot-gpio
pub type Result<T> = std::result::Result<T, DshotError>;
