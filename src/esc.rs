//! # ESC Driver
//!
//! The transmit entry point: "send this throttle value on this pin".
//!
//! [`EscDriver`] owns one [`GpioAccess`] behind an `RwLock`. Frames take the
//! read lock once each, never per bit; `init` and `shutdown` take the write
//! lock, so concurrent first use cannot map the device twice.
//!
//! The free functions [`init`], [`send`] and [`shutdown`] use a process-wide
//! driver on the memory-mapped backend with default settings.
//!
//! ## Usage
//!
//! ```no_run
//! fn main() -> dshot_gpio::error::Result<()> {
//!     // Zero throttle on GPIO 5; maps the registers on first use
//!     dshot_gpio::esc::send(48, 5)?;
//!     dshot_gpio::esc::shutdown();
//!     Ok(())
//! }
//! ```

use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::dshot::commands::DshotCommand;
use crate::dshot::encoder::{encode, Frame};
use crate::dshot::protocol::{DshotSpeed, Pin};
use crate::dshot::transmitter::{Transmitter, DEFAULT_FRAME_GAP_BITS};
use crate::error::Result;
use crate::gpio::{GpioAccess, GpioBackend, MmapGpio, MmapGpioConfig};
use crate::timing::{CalibrationSettings, MonotonicClock, TimingSource};

/// Driver behaviour settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    /// DShot speed class
    pub speed: DshotSpeed,
    /// Set the telemetry request bit on throttle frames
    pub telemetry: bool,
    /// Idle bit periods after each frame
    pub frame_gap_bits: u32,
    /// Map the registers on the first `send` instead of failing
    pub lazy_init: bool,
    /// Busy-wait calibration parameters
    pub calibration: CalibrationSettings,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            speed: DshotSpeed::default(),
            telemetry: false,
            frame_gap_bits: DEFAULT_FRAME_GAP_BITS,
            lazy_init: true,
            calibration: CalibrationSettings::default(),
        }
    }
}

/// DShot driver over one GPIO backend
pub struct EscDriver<B: GpioBackend, T: TimingSource = MonotonicClock> {
    access: RwLock<GpioAccess<B, T>>,
    transmitter: Transmitter,
    telemetry: bool,
    lazy_init: bool,
}

impl<B: GpioBackend, T: TimingSource> EscDriver<B, T> {
    /// Create a driver; nothing is mapped until [`init`](Self::init) or the first send
    pub fn new(backend: B, timing: T, settings: DriverSettings) -> Self {
        Self {
            access: RwLock::new(GpioAccess::new(backend, timing, settings.calibration)),
            transmitter: Transmitter::new(settings.speed, settings.frame_gap_bits),
            telemetry: settings.telemetry,
            lazy_init: settings.lazy_init,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GpioAccess<B, T>> {
        self.access.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GpioAccess<B, T>> {
        self.access.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map the GPIO registers and calibrate the busy-wait
    ///
    /// A no-op when already initialized.
    ///
    /// # Errors
    ///
    /// Returns `InitError::PermissionDenied` or `InitError::DeviceNotFound`
    /// wrapped in [`DshotError::Init`](crate::error::DshotError::Init).
    pub fn init(&self) -> Result<()> {
        let mut access = self.write();
        if access.is_initialized() {
            return Ok(());
        }

        access.initialize()?;
        let timings = self.transmitter.timings(&access);
        info!(
            "{} ready: T = {} ns, 1-bit high {} ns ({} iterations), 0-bit high {} ns ({} iterations), gap {} ns",
            self.transmitter.speed(),
            timings.period_ns,
            timings.one_high_ns,
            timings.one_high_iterations,
            timings.zero_high_ns,
            timings.zero_high_iterations,
            timings.gap_ns
        );
        Ok(())
    }

    /// Whether the GPIO registers are mapped
    pub fn is_initialized(&self) -> bool {
        self.read().is_initialized()
    }

    /// Drive configured pins low and unmap the registers
    ///
    /// Safe to call repeatedly or before [`init`](Self::init).
    pub fn shutdown(&self) {
        self.write().shutdown();
    }

    /// Encode `throttle` and transmit it on `pin`, blocking until done
    ///
    /// # Arguments
    ///
    /// * `throttle` - Command value 0-2047 (48 = zero throttle)
    /// * `pin` - BCM GPIO number
    ///
    /// # Errors
    ///
    /// * `EncodeError::InvalidCommandRange` - throttle outside 0-2047
    /// * `TransmitError::Pin` - pin outside the host's range
    /// * `TransmitError::HardwareUnavailable` - not initialized and lazy init disabled
    /// * `InitError` - lazy initialization failed
    pub fn send(&self, throttle: impl Into<i64>, pin: u32) -> Result<()> {
        let frame = encode(throttle, self.telemetry)?;
        self.send_frame(frame, Pin(pin))
    }

    /// Transmit an already encoded frame
    pub fn send_frame(&self, frame: Frame, pin: Pin) -> Result<()> {
        if self.lazy_init && !self.is_initialized() {
            self.init()?;
        }

        let access = self.read();
        self.transmitter.send(&access, frame, pin)?;
        Ok(())
    }

    /// Send a special command as many times as the ESC requires
    pub fn send_command(&self, command: DshotCommand, pin: u32) -> Result<()> {
        let frame = Frame::from_command(command.into(), self.telemetry || command.requires_telemetry());
        for _ in 0..command.repeat_count() {
            self.send_frame(frame, Pin(pin))?;
        }
        Ok(())
    }

    /// Transmitter configuration
    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }
}

impl<B: GpioBackend, T: TimingSource> Drop for EscDriver<B, T> {
    fn drop(&mut self) {
        self.access
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
    }
}

static GLOBAL_DRIVER: OnceLock<EscDriver<MmapGpio>> = OnceLock::new();

/// Process-wide driver on `/dev/gpiomem` with default settings
pub fn global() -> &'static EscDriver<MmapGpio> {
    GLOBAL_DRIVER.get_or_init(|| {
        EscDriver::new(
            MmapGpio::new(MmapGpioConfig::default()),
            MonotonicClock::new(),
            DriverSettings::default(),
        )
    })
}

/// Initialize the process-wide driver
pub fn init() -> Result<()> {
    global().init()
}

/// Send one frame on the process-wide driver, initializing it on first use
pub fn send(throttle: impl Into<i64>, pin: u32) -> Result<()> {
    global().send(throttle, pin)
}

/// Release the process-wide driver's register mapping
pub fn shutdown() {
    if let Some(driver) = GLOBAL_DRIVER.get() {
        driver.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DshotError, EncodeError, InitError, PinError, TransmitError};
    use crate::gpio::{GpioEventKind, RecordingGpio};
    use crate::timing::mocks::SimulatedClock;
    use std::cell::Cell;
    use std::sync::Barrier;

    fn driver(settings: DriverSettings) -> (EscDriver<RecordingGpio, SimulatedClock>, RecordingGpio) {
        let clock = SimulatedClock::new(2500);
        let recorder = RecordingGpio::new(28).with_clock(clock.clone());
        (EscDriver::new(recorder.clone(), clock, settings), recorder)
    }

    fn high_times(recorder: &RecordingGpio) -> Vec<u64> {
        let events = recorder.events();
        let sets = events.iter().filter(|e| e.kind == GpioEventKind::Set);
        let clears = events.iter().filter(|e| e.kind == GpioEventKind::Clear);
        sets.zip(clears).map(|(rise, fall)| fall.at_ns - rise.at_ns).collect()
    }

    #[test]
    fn test_send_initializes_lazily() {
        let (esc, recorder) = driver(DriverSettings::default());
        assert!(!esc.is_initialized());

        esc.send(48, 5).unwrap();

        assert!(esc.is_initialized());
        assert_eq!(recorder.init_calls(), 1);
        assert_eq!(high_times(&recorder).len(), 16);
    }

    #[test]
    fn test_send_without_lazy_init_fails() {
        let (esc, recorder) = driver(DriverSettings {
            lazy_init: false,
            ..DriverSettings::default()
        });

        let err = esc.send(48, 5).unwrap_err();
        assert!(matches!(err, DshotError::Transmit(TransmitError::HardwareUnavailable)));
        assert_eq!(recorder.register_writes(), 0);

        esc.init().unwrap();
        esc.send(48, 5).unwrap();
    }

    #[test]
    fn test_send_rejects_out_of_range_throttle() {
        let (esc, recorder) = driver(DriverSettings::default());

        for throttle in [-1i64, 2048] {
            let err = esc.send(throttle, 5).unwrap_err();
            assert!(matches!(
                err,
                DshotError::Encode(EncodeError::InvalidCommandRange(v)) if v == throttle
            ));
        }
        assert_eq!(recorder.register_writes(), 0);
    }

    #[test]
    fn test_send_rejects_invalid_pin() {
        let (esc, recorder) = driver(DriverSettings::default());

        let err = esc.send(48, 9999).unwrap_err();
        assert!(matches!(
            err,
            DshotError::Transmit(TransmitError::Pin(PinError::InvalidPin { pin: 9999, .. }))
        ));
        assert_eq!(recorder.register_writes(), 0);
    }

    #[test]
    fn test_init_failure_is_reported() {
        let clock = SimulatedClock::new(2500);
        let esc = EscDriver::new(
            RecordingGpio::new(28).deny_access(),
            clock,
            DriverSettings::default(),
        );

        let err = esc.send(48, 5).unwrap_err();
        assert!(matches!(err, DshotError::Init(InitError::PermissionDenied(_))));
        assert!(!esc.is_initialized());
    }

    #[test]
    fn test_send_command_repeats_with_telemetry() {
        let (esc, recorder) = driver(DriverSettings::default());

        esc.send_command(DshotCommand::SaveSettings, 7).unwrap();

        let highs = high_times(&recorder);
        assert_eq!(highs.len(), 16 * 6);

        // SaveSettings with telemetry: 0x0198, telemetry flag is the 12th bit sent
        let period = DshotSpeed::Dshot150.bit_period_ns();
        let first: u16 = highs[..16]
            .iter()
            .fold(0, |acc, &high| (acc << 1) | u16::from(high * 2 > period));
        assert_eq!(first, 0x0198);
        assert!(highs[11] * 2 > period);
    }

    #[test]
    fn test_send_command_once_without_telemetry() {
        let (esc, recorder) = driver(DriverSettings::default());

        esc.send_command(DshotCommand::Beep1, 7).unwrap();

        assert_eq!(high_times(&recorder).len(), 16);
    }

    #[test]
    fn test_telemetry_setting_applies_to_throttle() {
        let (esc, recorder) = driver(DriverSettings {
            telemetry: true,
            ..DriverSettings::default()
        });

        esc.send(48, 5).unwrap();

        let period = DshotSpeed::Dshot150.bit_period_ns();
        let value: u16 = high_times(&recorder)
            .iter()
            .fold(0, |acc, &high| (acc << 1) | u16::from(high * 2 > period));
        assert_eq!(value, encode(48, true).unwrap().value());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (esc, recorder) = driver(DriverSettings::default());
        esc.shutdown();

        esc.init().unwrap();
        esc.shutdown();
        esc.shutdown();

        assert!(!esc.is_initialized());
        assert_eq!(recorder.shutdown_calls(), 1);
    }

    #[test]
    fn test_reinit_after_shutdown() {
        let (esc, recorder) = driver(DriverSettings::default());
        esc.send(48, 5).unwrap();
        esc.shutdown();
        esc.send(48, 5).unwrap();

        assert_eq!(recorder.init_calls(), 2);
        // The pin is configured again after remapping
        let configures = recorder
            .events()
            .iter()
            .filter(|e| e.kind == GpioEventKind::Configure)
            .count();
        assert_eq!(configures, 2);
    }

    #[test]
    fn test_drop_leaves_pins_low() {
        let (esc, recorder) = driver(DriverSettings::default());
        esc.send(99, 19).unwrap();
        drop(esc);

        assert_eq!(recorder.shutdown_calls(), 1);
        assert_eq!(recorder.events().last().unwrap().kind, GpioEventKind::Clear);
    }

    thread_local! {
        static THREAD_NOW_PS: Cell<u64> = const { Cell::new(0) };
    }

    /// Simulated clock with an independent timeline per thread
    struct ThreadLocalClock;

    impl TimingSource for ThreadLocalClock {
        fn now_ns(&self) -> u64 {
            THREAD_NOW_PS.with(|now| now.get() / 1000)
        }

        fn spin(&self, iterations: u64) {
            THREAD_NOW_PS.with(|now| now.set(now.get() + iterations * 2500));
        }
    }

    #[test]
    fn test_concurrent_first_send_initializes_once() {
        let recorder = RecordingGpio::new(28).with_clock(ThreadLocalClock);
        let esc = EscDriver::new(recorder.clone(), ThreadLocalClock, DriverSettings::default());
        let pins = [5u32, 7, 19, 20];
        let barrier = Barrier::new(pins.len());

        std::thread::scope(|scope| {
            for (i, &pin) in pins.iter().enumerate() {
                let esc = &esc;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    esc.send(48 + 50 * i as i64, pin).unwrap();
                });
            }
        });

        assert!(esc.is_initialized());
        assert_eq!(recorder.init_calls(), 1);

        let period = DshotSpeed::Dshot150.bit_period_ns();
        let events = recorder.events();
        for (i, &pin) in pins.iter().enumerate() {
            let on_pin: Vec<_> = events.iter().filter(|e| e.pin == Pin(pin)).collect();
            let sets = on_pin.iter().filter(|e| e.kind == GpioEventKind::Set);
            let clears = on_pin.iter().filter(|e| e.kind == GpioEventKind::Clear);
            let highs: Vec<u64> = sets.zip(clears).map(|(rise, fall)| fall.at_ns - rise.at_ns).collect();
            assert_eq!(highs.len(), 16, "pin {}", pin);

            let value = highs
                .iter()
                .fold(0u16, |acc, &high| (acc << 1) | u16::from(high * 2 > period));
            assert_eq!(value, encode(48 + 50 * i as i64, false).unwrap().value(), "pin {}", pin);
        }
    }

    #[test]
    fn test_global_shutdown_before_init() {
        shutdown();
        shutdown();
    }
}
