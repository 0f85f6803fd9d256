//! # GPIO Access Module
//!
//! Owns the GPIO register mapping and the busy-wait calibration.
//!
//! This module handles:
//! - The `GpioBackend` capability (map, unmap, configure, set, clear)
//! - A memory-mapped BCM283x backend and a recording backend for tests
//! - Pin range validation ahead of any register write
//! - One-time calibration shared by every transmit call

pub mod mmap;
pub mod recording;

pub use mmap::{MmapGpio, MmapGpioConfig};
pub use recording::{GpioEvent, GpioEventKind, RecordingGpio};

use std::sync::OnceLock;
use tracing::{debug, info};

use crate::dshot::protocol::Pin;
use crate::error::{InitError, PinError};
use crate::timing::{Calibration, CalibrationSettings, MonotonicClock, TimingSource};

/// Register-level GPIO capability
///
/// Implementations must make `set_pin`/`clear_pin` cheap: they run inside
/// the per-bit timing loop.
pub trait GpioBackend {
    /// Map the register block; a no-op when already mapped
    fn initialize(&mut self) -> Result<(), InitError>;

    /// Unmap the register block; a no-op when not mapped
    fn shutdown(&mut self);

    /// Whether the register block is currently mapped
    fn is_initialized(&self) -> bool;

    /// Number of GPIO lines the host exposes (valid pins are `0..pin_count`)
    fn pin_count(&self) -> u32;

    /// Switch a pin to output mode and drive it low
    fn configure_output(&self, pin: Pin) -> Result<(), PinError>;

    /// Drive a pin high
    fn set_pin(&self, pin: Pin) -> Result<(), PinError>;

    /// Drive a pin low
    fn clear_pin(&self, pin: Pin) -> Result<(), PinError>;

    /// Pins switched to output since the last initialization
    fn configured_pins(&self) -> Vec<Pin>;
}

/// GPIO access with lazily cached busy-wait calibration
pub struct GpioAccess<B, T = MonotonicClock> {
    backend: B,
    timing: T,
    calibration_settings: CalibrationSettings,
    calibration: OnceLock<Calibration>,
}

impl<B: GpioBackend, T: TimingSource> GpioAccess<B, T> {
    /// Wrap a backend and timing source; nothing is mapped yet
    pub fn new(backend: B, timing: T, calibration_settings: CalibrationSettings) -> Self {
        Self {
            backend,
            timing,
            calibration_settings,
            calibration: OnceLock::new(),
        }
    }

    /// Map the GPIO registers
    ///
    /// # Errors
    ///
    /// * `InitError::PermissionDenied` - no privilege to map device memory
    /// * `InitError::DeviceNotFound` - GPIO device absent
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if self.backend.is_initialized() {
            return Ok(());
        }

        self.backend.initialize()?;
        info!("GPIO registers mapped ({} lines)", self.backend.pin_count());
        Ok(())
    }

    /// Drive every configured pin low, then unmap the registers
    ///
    /// Safe to call repeatedly or before [`initialize`](Self::initialize).
    pub fn shutdown(&mut self) {
        if !self.backend.is_initialized() {
            return;
        }

        for pin in self.backend.configured_pins() {
            let _ = self.backend.clear_pin(pin);
        }
        self.backend.shutdown();
        info!("GPIO registers unmapped");
    }

    /// Whether the register window is mapped
    pub fn is_initialized(&self) -> bool {
        self.backend.is_initialized()
    }

    /// Busy-wait calibration, measured on first use and cached
    pub fn calibrate(&self) -> Calibration {
        *self
            .calibration
            .get_or_init(|| Calibration::measure(&self.timing, &self.calibration_settings))
    }

    /// Check that `pin` is one of the host's lines
    pub fn validate_pin(&self, pin: Pin) -> Result<(), PinError> {
        let pin_count = self.backend.pin_count();
        if pin.number() >= pin_count {
            return Err(PinError::InvalidPin {
                pin: pin.number(),
                pin_count,
            });
        }
        Ok(())
    }

    /// Switch `pin` to output mode (first use only) and drive it low
    pub fn configure_output(&self, pin: Pin) -> Result<(), PinError> {
        self.validate_pin(pin)?;
        self.backend.configure_output(pin)?;
        debug!("{} ready for output", pin);
        Ok(())
    }

    /// Drive `pin` high
    #[inline]
    pub fn set_pin(&self, pin: Pin) -> Result<(), PinError> {
        self.validate_pin(pin)?;
        self.backend.set_pin(pin)
    }

    /// Drive `pin` low
    #[inline]
    pub fn clear_pin(&self, pin: Pin) -> Result<(), PinError> {
        self.validate_pin(pin)?;
        self.backend.clear_pin(pin)
    }

    /// Timing source used for calibration and deadlines
    pub fn timing(&self) -> &T {
        &self.timing
    }

    /// Underlying register backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::mocks::SimulatedClock;

    fn access(pin_count: u32) -> GpioAccess<RecordingGpio, SimulatedClock> {
        GpioAccess::new(
            RecordingGpio::new(pin_count),
            SimulatedClock::new(2500),
            CalibrationSettings::default(),
        )
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut gpio = access(28);
        gpio.initialize().unwrap();
        gpio.initialize().unwrap();

        assert!(gpio.is_initialized());
        assert_eq!(gpio.backend().init_calls(), 1);
    }

    #[test]
    fn test_initialize_permission_denied() {
        let mut gpio = GpioAccess::new(
            RecordingGpio::new(28).deny_access(),
            SimulatedClock::new(2500),
            CalibrationSettings::default(),
        );

        let err = gpio.initialize().unwrap_err();
        assert!(matches!(err, InitError::PermissionDenied(_)));
        assert!(!gpio.is_initialized());
    }

    #[test]
    fn test_shutdown_before_initialize() {
        let mut gpio = access(28);
        gpio.shutdown();
        gpio.shutdown();
        assert!(!gpio.is_initialized());
        assert_eq!(gpio.backend().shutdown_calls(), 0);
    }

    #[test]
    fn test_shutdown_twice_after_initialize() {
        let mut gpio = access(28);
        gpio.initialize().unwrap();
        gpio.shutdown();
        gpio.shutdown();

        assert!(!gpio.is_initialized());
        assert_eq!(gpio.backend().shutdown_calls(), 1);
    }

    #[test]
    fn test_shutdown_drives_configured_pins_low() {
        let mut gpio = access(28);
        gpio.initialize().unwrap();
        gpio.configure_output(Pin(5)).unwrap();
        gpio.set_pin(Pin(5)).unwrap();
        gpio.shutdown();

        let events = gpio.backend().events();
        let last = events.last().unwrap();
        assert_eq!(last.kind, GpioEventKind::Clear);
        assert_eq!(last.pin, Pin(5));
    }

    #[test]
    fn test_set_pin_rejects_out_of_range() {
        let mut gpio = access(28);
        gpio.initialize().unwrap();

        assert_eq!(
            gpio.set_pin(Pin(28)),
            Err(PinError::InvalidPin { pin: 28, pin_count: 28 })
        );
        assert_eq!(
            gpio.clear_pin(Pin(9999)),
            Err(PinError::InvalidPin { pin: 9999, pin_count: 28 })
        );
        assert_eq!(gpio.backend().register_writes(), 0);
    }

    #[test]
    fn test_set_pin_before_initialize() {
        let gpio = access(28);
        assert_eq!(gpio.set_pin(Pin(5)), Err(PinError::NotInitialized));
    }

    #[test]
    fn test_set_and_clear_pin() {
        let mut gpio = access(28);
        gpio.initialize().unwrap();
        gpio.set_pin(Pin(27)).unwrap();
        gpio.clear_pin(Pin(27)).unwrap();

        let kinds: Vec<GpioEventKind> = gpio.backend().events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![GpioEventKind::Set, GpioEventKind::Clear]);
    }

    #[test]
    fn test_calibration_is_cached() {
        let gpio = access(28);
        let first = gpio.calibrate();
        let after_first = gpio.timing().now_ns();

        let second = gpio.calibrate();
        assert_eq!(first, second);
        // Second call must not spin again
        assert_eq!(gpio.timing().now_ns(), after_first);
        assert!((first.iterations_per_ns() - 0.4).abs() < 1e-9);
    }
}
