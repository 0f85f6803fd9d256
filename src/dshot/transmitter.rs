//! # DShot Bit Transmitter
//!
//! Emits a [`Frame`] as a GPIO waveform by busy-waiting between register
//! writes.
//!
//! Each bit starts with the line high. The high phase is a counted spin
//! (calibrated iterations, rounded down). The low phase spins on the clock
//! until the bit has lasted a full period T from its own rising edge. If the
//! high phase overran (the thread was preempted), the low phase still gets
//! its nominal length, so a late bit is stretched rather than shortened and
//! the bits after it keep their shape. Jitter is not corrected mid-frame.
//!
//! ```text
//!        |<-------- T -------->|
//!  1:    ‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|______|   high 75% of T
//!  0:    ‾‾‾‾‾‾‾|______________|   high 37.5% of T
//! ```

use tracing::{trace, warn};

use super::encoder::Frame;
use super::protocol::{DshotSpeed, Pin, DSHOT_FRAME_BITS};
use crate::error::TransmitError;
use crate::gpio::{GpioAccess, GpioBackend};
use crate::timing::{spin_until, Calibration, TimingSource};

/// Default idle time after a frame, in bit periods
pub const DEFAULT_FRAME_GAP_BITS: u32 = 4;

/// Bit durations for one speed class under one calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitTimings {
    /// Bit period T in nanoseconds
    pub period_ns: u64,
    /// Nominal high-time of a `1` bit in nanoseconds
    pub one_high_ns: u64,
    /// Nominal high-time of a `0` bit in nanoseconds
    pub zero_high_ns: u64,
    /// Spin iterations for the high phase of a `1` bit
    pub one_high_iterations: u64,
    /// Spin iterations for the high phase of a `0` bit
    pub zero_high_iterations: u64,
    /// Low hold after the last bit in nanoseconds
    pub gap_ns: u64,
}

impl BitTimings {
    /// Derive timings for `speed` from a measured calibration
    pub fn new(speed: DshotSpeed, calibration: &Calibration, frame_gap_bits: u32) -> Self {
        let period_ns = speed.bit_period_ns();
        let one_high_ns = speed.one_high_ns();
        let zero_high_ns = speed.zero_high_ns();

        Self {
            period_ns,
            one_high_ns,
            zero_high_ns,
            one_high_iterations: calibration.iterations_for(one_high_ns),
            zero_high_iterations: calibration.iterations_for(zero_high_ns),
            gap_ns: period_ns * u64::from(frame_gap_bits.max(1)),
        }
    }

    /// Total time a call occupies the thread: 16 bits plus the gap
    pub fn frame_with_gap_ns(&self) -> u64 {
        self.period_ns * u64::from(DSHOT_FRAME_BITS) + self.gap_ns
    }
}

/// Bit-banged DShot transmitter for one speed class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmitter {
    speed: DshotSpeed,
    frame_gap_bits: u32,
}

impl Default for Transmitter {
    fn default() -> Self {
        Self::new(DshotSpeed::default(), DEFAULT_FRAME_GAP_BITS)
    }
}

impl Transmitter {
    /// Transmitter for `speed`, idling `frame_gap_bits` periods (at least 1) after each frame
    pub fn new(speed: DshotSpeed, frame_gap_bits: u32) -> Self {
        Self {
            speed,
            frame_gap_bits: frame_gap_bits.max(1),
        }
    }

    /// Configured speed class
    pub fn speed(&self) -> DshotSpeed {
        self.speed
    }

    /// Idle periods after each frame
    pub fn frame_gap_bits(&self) -> u32 {
        self.frame_gap_bits
    }

    /// Timings under `gpio`'s calibration (measured on first call)
    pub fn timings<B: GpioBackend, T: TimingSource>(&self, gpio: &GpioAccess<B, T>) -> BitTimings {
        BitTimings::new(self.speed, &gpio.calibrate(), self.frame_gap_bits)
    }

    /// Transmit `frame` on `pin`, blocking for the frame plus the idle gap
    ///
    /// Preconditions are checked before the first register write, so a
    /// rejected call never emits a partial frame. The caller must not drive
    /// the same pin from another thread at the same time.
    ///
    /// # Errors
    ///
    /// * `TransmitError::HardwareUnavailable` - registers not mapped
    /// * `TransmitError::Pin` - pin outside the host's range
    pub fn send<B: GpioBackend, T: TimingSource>(
        &self,
        gpio: &GpioAccess<B, T>,
        frame: Frame,
        pin: Pin,
    ) -> Result<(), TransmitError> {
        if !gpio.is_initialized() {
            return Err(TransmitError::HardwareUnavailable);
        }
        gpio.validate_pin(pin)?;

        let timings = self.timings(gpio);
        gpio.configure_output(pin)?;

        let result = self.emit(gpio, &timings, frame, pin);
        match &result {
            Ok(()) => trace!("Sent frame {:#06x} on {}", frame.value(), pin),
            Err(e) => {
                // Never leave the line stuck high
                let _ = gpio.clear_pin(pin);
                warn!("Frame {:#06x} on {} aborted: {}", frame.value(), pin, e);
            }
        }
        result
    }

    fn emit<B: GpioBackend, T: TimingSource>(
        &self,
        gpio: &GpioAccess<B, T>,
        timings: &BitTimings,
        frame: Frame,
        pin: Pin,
    ) -> Result<(), TransmitError> {
        let timing = gpio.timing();
        let mut bit_end = timing.now_ns();

        for bit in frame.bits() {
            let (high_ns, high_iterations) = if bit {
                (timings.one_high_ns, timings.one_high_iterations)
            } else {
                (timings.zero_high_ns, timings.zero_high_iterations)
            };

            let rise = timing.now_ns();
            gpio.set_pin(pin)?;
            timing.spin(high_iterations);
            gpio.clear_pin(pin)?;
            let fall = timing.now_ns();

            bit_end = (rise + timings.period_ns).max(fall + timings.period_ns - high_ns);
            spin_until(timing, bit_end);
        }

        spin_until(timing, bit_end + timings.gap_ns);
        Ok(())
    }
}
