//! # DShot Protocol Module
//!
//! Implementation of the DShot ESC protocol over bit-banged GPIO.
//!
//! This module handles:
//! - Frame encoding (11-bit command, telemetry flag, 4-bit checksum)
//! - Special command values (0-47)
//! - Speed classes and their bit timings
//! - Waveform transmission with calibrated busy-waits

pub mod protocol;
pub mod encoder;
pub mod commands;
pub mod crc;
pub mod transmitter;

pub use commands::DshotCommand;
pub use encoder::{encode, Frame};
pub use protocol::{DshotSpeed, Pin, ThrottleCommand};
pub use transmitter::{BitTimings, Transmitter};
