//! # Timing Module
//!
//! Busy-wait primitives and the clock they are measured against.
//!
//! This module handles:
//! - The `TimingSource` abstraction (monotonic clock + counted spin)
//! - The real `Instant`-backed clock
//! - Deadline spinning used for the low phase of each bit
//! - Calibration of spin iterations against the clock

pub mod calibration;

pub use calibration::{Calibration, CalibrationSettings};

use std::hint::black_box;
use std::time::Instant;

/// Spin iterations between clock polls in [`spin_until`]
pub const DEADLINE_POLL_ITERATIONS: u64 = 4;

/// Clock and busy-wait source used by the transmitter
///
/// The real implementation spins the CPU; test implementations advance a
/// simulated clock so waveforms can be measured deterministically.
#[cfg_attr(test, mockall::automock)]
pub trait TimingSource {
    /// Monotonic time in nanoseconds since an arbitrary origin
    fn now_ns(&self) -> u64;

    /// Burn `iterations` loop iterations without yielding
    fn spin(&self, iterations: u64);
}

/// Monotonic clock backed by [`std::time::Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingSource for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    #[inline(never)]
    fn spin(&self, iterations: u64) {
        let mut i = 0u64;
        while i < iterations {
            // black_box keeps the loop from being folded away
            i = black_box(i + 1);
        }
    }
}

impl<T: TimingSource + ?Sized> TimingSource for std::sync::Arc<T> {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }

    fn spin(&self, iterations: u64) {
        (**self).spin(iterations)
    }
}

/// Busy-wait until the clock reaches `deadline_ns`
///
/// Returns immediately if the deadline has already passed.
pub fn spin_until<T: TimingSource + ?Sized>(timing: &T, deadline_ns: u64) {
    while timing.now_ns() < deadline_ns {
        timing.spin(DEADLINE_POLL_ITERATIONS);
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Simulated clock where time only moves when something spins
    ///
    /// Time is kept in picoseconds so fractional iteration costs stay exact.
    #[derive(Debug, Clone)]
    pub struct SimulatedClock {
        now_ps: Arc<AtomicU64>,
        ps_per_iteration: u64,
    }

    impl SimulatedClock {
        pub fn new(ps_per_iteration: u64) -> Self {
            Self {
                now_ps: Arc::new(AtomicU64::new(0)),
                ps_per_iteration,
            }
        }

        /// Jump the clock forward, as if the thread had been preempted
        pub fn advance_ns(&self, ns: u64) {
            self.now_ps.fetch_add(ns * 1000, Ordering::SeqCst);
        }
    }

    impl TimingSource for SimulatedClock {
        fn now_ns(&self) -> u64 {
            self.now_ps.load(Ordering::SeqCst) / 1000
        }

        fn spin(&self, iterations: u64) {
            self.now_ps
                .fetch_add(iterations * self.ps_per_iteration, Ordering::SeqCst);
        }
    }

    /// Log sink shared between a test and its subscriber
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a TRACE-level subscriber and return everything it logged
    pub fn capture_logs<F: FnOnce()>(f: F) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || LogBuffer(Arc::clone(&sink)))
            .finish();

        tracing::subscriber::with_default(subscriber, f);

        let bytes = buffer.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
