//! # dshot-gpio
//!
//! Drive DShot electronic speed controllers from Raspberry Pi GPIO pins.
//!
//! Frames are encoded in software and bit-banged on memory-mapped GPIO
//! registers, with each bit's high and low phases timed by a calibrated
//! busy-wait.

pub mod config;
pub mod dshot;
pub mod error;
pub mod esc;
pub mod gpio;
pub mod runner;
pub mod timing;
