//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::dshot::protocol::{DshotSpeed, DSHOT_COMMAND_MAX};
use crate::dshot::transmitter::DEFAULT_FRAME_GAP_BITS;
use crate::error::{DshotError, Result};
use crate::esc::DriverSettings;
use crate::gpio::mmap::{MmapGpioConfig, BCM2837_PERIPHERAL_BASE, DEV_GPIOMEM, HEADER_PIN_COUNT, MAX_PIN_COUNT};
use crate::runner::{default_phases, ThrottlePhase};
use crate::timing::CalibrationSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub dshot: DshotConfig,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GPIO register access configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpioConfig {
    #[serde(default = "default_device_path")]
    pub device_path: String,

    #[serde(default = "default_peripheral_base")]
    pub peripheral_base: u64,

    #[serde(default = "default_pin_count")]
    pub pin_count: u32,

    /// Record register writes instead of touching hardware
    #[serde(default)]
    pub dry_run: bool,
}

/// DShot signal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DshotConfig {
    #[serde(default)]
    pub speed: DshotSpeed,

    #[serde(default)]
    pub telemetry: bool,

    #[serde(default = "default_frame_gap_bits")]
    pub frame_gap_bits: u32,

    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// Throttle schedule configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_pins")]
    pub pins: Vec<u32>,

    #[serde(default = "default_disarm_frames")]
    pub disarm_frames: u32,

    #[serde(default = "default_phases")]
    pub phases: Vec<ThrottlePhase>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily rolling log files here
    #[serde(default)]
    pub directory: Option<String>,
}

// Default value functions
fn default_device_path() -> String { DEV_GPIOMEM.to_string() }
fn default_peripheral_base() -> u64 { BCM2837_PERIPHERAL_BASE }
fn default_pin_count() -> u32 { HEADER_PIN_COUNT }

fn default_frame_gap_bits() -> u32 { DEFAULT_FRAME_GAP_BITS }
fn default_lazy_init() -> bool { true }

fn default_pins() -> Vec<u32> { vec![5, 7, 19, 20] }
fn default_disarm_frames() -> u32 { 200 }

fn default_log_level() -> String { "info".to_string() }

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            peripheral_base: default_peripheral_base(),
            pin_count: default_pin_count(),
            dry_run: false,
        }
    }
}

impl GpioConfig {
    /// Settings for the memory-mapped backend
    pub fn mmap_config(&self) -> MmapGpioConfig {
        MmapGpioConfig {
            device_path: self.device_path.clone(),
            peripheral_base: self.peripheral_base,
            pin_count: self.pin_count,
        }
    }
}

impl Default for DshotConfig {
    fn default() -> Self {
        Self {
            speed: DshotSpeed::default(),
            telemetry: false,
            frame_gap_bits: default_frame_gap_bits(),
            lazy_init: default_lazy_init(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pins: default_pins(),
            disarm_frames: default_disarm_frames(),
            phases: default_phases(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> DshotError {
    DshotError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dshot_gpio::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Driver settings derived from the `[dshot]` and `[calibration]` sections
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            speed: self.dshot.speed,
            telemetry: self.dshot.telemetry,
            frame_gap_bits: self.dshot.frame_gap_bits,
            lazy_init: self.dshot.lazy_init,
            calibration: self.calibration,
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // GPIO
        if self.gpio.device_path.is_empty() {
            return Err(invalid("gpio device_path cannot be empty"));
        }

        if self.gpio.pin_count == 0 || self.gpio.pin_count > MAX_PIN_COUNT {
            return Err(invalid(format!("pin_count must be between 1 and {}", MAX_PIN_COUNT)));
        }

        // DShot
        if self.dshot.frame_gap_bits == 0 || self.dshot.frame_gap_bits > 1000 {
            return Err(invalid("frame_gap_bits must be between 1 and 1000"));
        }

        // Calibration
        if self.calibration.trials == 0 || self.calibration.trials > 101 {
            return Err(invalid("calibration trials must be between 1 and 101"));
        }

        if !(1_000..=100_000_000).contains(&self.calibration.spin_iterations) {
            return Err(invalid("spin_iterations must be between 1000 and 100000000"));
        }

        // Runner pins
        if self.runner.pins.is_empty() {
            return Err(invalid("runner pins cannot be empty"));
        }

        let mut seen = HashSet::new();
        for &pin in &self.runner.pins {
            if pin >= self.gpio.pin_count {
                return Err(invalid(format!(
                    "runner pin {} is out of bounds (must be 0-{})",
                    pin,
                    self.gpio.pin_count - 1
                )));
            }
            if !seen.insert(pin) {
                return Err(invalid(format!("runner pin {} is listed twice", pin)));
            }
        }

        // Runner phases
        if self.runner.phases.is_empty() {
            return Err(invalid("runner phases cannot be empty"));
        }

        for (index, phase) in self.runner.phases.iter().enumerate() {
            if phase.throttle > DSHOT_COMMAND_MAX {
                return Err(invalid(format!(
                    "phase {} throttle {} exceeds {}",
                    index + 1,
                    phase.throttle,
                    DSHOT_COMMAND_MAX
                )));
            }
            if phase.frames == 0 {
                return Err(invalid(format!("phase {} frames must be greater than 0", index + 1)));
            }
        }

        // Logging
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }
}
