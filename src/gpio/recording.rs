//! Recording GPIO backend
//!
//! Performs no hardware access. Every register write is appended to an
//! event log, optionally stamped with a [`TimingSource`], so waveforms can
//! be inspected in tests and dry runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::GpioBackend;
use crate::dshot::protocol::Pin;
use crate::error::{InitError, PinError};
use crate::timing::TimingSource;

/// Register write kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioEventKind {
    /// Pin switched to output and driven low
    Configure,
    /// Pin driven high
    Set,
    /// Pin driven low
    Clear,
}

/// One recorded register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioEvent {
    pub kind: GpioEventKind,
    pub pin: Pin,
    /// Timestamp from the attached clock, 0 without one
    pub at_ns: u64,
}

/// GPIO backend that records instead of writing registers
///
/// Clones share the event log and counters, so a test can keep a handle
/// after moving the backend into a driver.
#[derive(Clone)]
pub struct RecordingGpio {
    pin_count: u32,
    initialized: bool,
    deny_access: bool,
    keep_events: bool,
    clock: Option<Arc<dyn TimingSource + Send + Sync>>,
    events: Arc<Mutex<Vec<GpioEvent>>>,
    writes: Arc<AtomicUsize>,
    configured: Arc<Mutex<Vec<Pin>>>,
    init_calls: Arc<AtomicUsize>,
    shutdown_calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RecordingGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingGpio")
            .field("pin_count", &self.pin_count)
            .field("initialized", &self.initialized)
            .field("register_writes", &self.register_writes())
            .finish_non_exhaustive()
    }
}

impl RecordingGpio {
    /// Recording backend exposing GPIO `0..pin_count`
    pub fn new(pin_count: u32) -> Self {
        Self {
            pin_count,
            initialized: false,
            deny_access: false,
            keep_events: true,
            clock: None,
            events: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(AtomicUsize::new(0)),
            configured: Arc::new(Mutex::new(Vec::new())),
            init_calls: Arc::new(AtomicUsize::new(0)),
            shutdown_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stamp events with `clock`
    pub fn with_clock<C: TimingSource + Send + Sync + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Make `initialize` fail as if the process lacked privilege
    pub fn deny_access(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Count register writes without keeping the event log
    ///
    /// For long dry runs, where the log would grow by 33 events per frame.
    pub fn count_only(mut self) -> Self {
        self.keep_events = false;
        self
    }

    /// Snapshot of all recorded register writes
    pub fn events(&self) -> Vec<GpioEvent> {
        lock(&self.events).clone()
    }

    /// Forget recorded events and reset the write count
    pub fn clear_events(&self) {
        lock(&self.events).clear();
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Number of register writes since creation or the last `clear_events`
    pub fn register_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful `initialize` calls that mapped the window
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls that unmapped the window
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    fn record(&self, kind: GpioEventKind, pin: Pin) -> Result<(), PinError> {
        if !self.initialized {
            return Err(PinError::NotInitialized);
        }
        if pin.number() >= self.pin_count {
            return Err(PinError::InvalidPin {
                pin: pin.number(),
                pin_count: self.pin_count,
            });
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.keep_events {
            let at_ns = self.clock.as_ref().map_or(0, |clock| clock.now_ns());
            lock(&self.events).push(GpioEvent { kind, pin, at_ns });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GpioBackend for RecordingGpio {
    fn initialize(&mut self) -> Result<(), InitError> {
        if self.initialized {
            return Ok(());
        }
        if self.deny_access {
            return Err(InitError::PermissionDenied("recording backend".to_string()));
        }

        self.initialized = true;
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }

        self.initialized = false;
        lock(&self.configured).clear();
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn pin_count(&self) -> u32 {
        self.pin_count
    }

    fn configure_output(&self, pin: Pin) -> Result<(), PinError> {
        if lock(&self.configured).contains(&pin) {
            return Ok(());
        }

        self.record(GpioEventKind::Configure, pin)?;
        lock(&self.configured).push(pin);
        Ok(())
    }

    fn set_pin(&self, pin: Pin) -> Result<(), PinError> {
        self.record(GpioEventKind::Set, pin)
    }

    fn clear_pin(&self, pin: Pin) -> Result<(), PinError> {
        self.record(GpioEventKind::Clear, pin)
    }

    fn configured_pins(&self) -> Vec<Pin> {
        lock(&self.configured).clone()
    }
}
