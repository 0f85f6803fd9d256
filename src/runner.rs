//! # Throttle Phase Runner
//!
//! Drives a set of ESCs through a fixed throttle schedule.
//!
//! Each phase sends `frames` rounds; a round is one frame to every pin, in
//! pin order. When the schedule ends or the stop flag is raised, a burst of
//! zero-throttle rounds follows so the ESCs are left armed at idle instead
//! of holding the last throttle until their signal-loss timeout.

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::dshot::protocol::DSHOT_THROTTLE_ZERO;
use crate::error::Result;
use crate::esc::EscDriver;
use crate::gpio::GpioBackend;
use crate::timing::TimingSource;

/// Number of rounds between progress log messages
pub const LOG_INTERVAL_ROUNDS: u64 = 10_000;

/// One step of the throttle schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ThrottlePhase {
    /// Command value (48 = zero throttle)
    pub throttle: u16,
    /// Rounds to send at this throttle
    pub frames: u32,
}

impl ThrottlePhase {
    pub fn new(throttle: u16, frames: u32) -> Self {
        Self { throttle, frames }
    }
}

/// Default schedule: hold zero so the ESCs arm, spin up, then spin faster
pub fn default_phases() -> Vec<ThrottlePhase> {
    vec![
        ThrottlePhase::new(48, 10_000),
        ThrottlePhase::new(99, 20_000),
        ThrottlePhase::new(199, 10_000),
    ]
}

/// Outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Frames sent, disarm burst included
    pub frames_sent: u64,
    /// Phases that ran to completion
    pub phases_completed: usize,
    /// Whether the stop flag cut the schedule short
    pub stopped: bool,
}

/// Run `phases` on `pins`, then send `disarm_frames` rounds of zero throttle
///
/// `stop` is checked between rounds; a frame in flight always completes.
///
/// # Errors
///
/// Returns the first send error. The disarm burst is skipped in that case,
/// since the same error would most likely repeat.
pub fn run_phases<B: GpioBackend, T: TimingSource>(
    esc: &EscDriver<B, T>,
    pins: &[u32],
    phases: &[ThrottlePhase],
    disarm_frames: u32,
    stop: &AtomicBool,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    'phases: for (index, phase) in phases.iter().enumerate() {
        info!(
            "Phase {}/{}: throttle {} for {} rounds on pins {:?}",
            index + 1,
            phases.len(),
            phase.throttle,
            phase.frames,
            pins
        );

        for round in 1..=u64::from(phase.frames) {
            if stop.load(Ordering::Relaxed) {
                summary.stopped = true;
                break 'phases;
            }

            send_round(esc, pins, phase.throttle, &mut summary)?;

            if round % LOG_INTERVAL_ROUNDS == 0 {
                debug!("Throttle {}: {} rounds sent", phase.throttle, round);
            }
        }

        summary.phases_completed += 1;
    }

    if summary.stopped {
        info!("Stop requested, returning ESCs to zero throttle");
    }

    for _ in 0..disarm_frames {
        send_round(esc, pins, DSHOT_THROTTLE_ZERO, &mut summary)?;
    }

    info!(
        "Run finished: {} frames sent, {}/{} phases completed",
        summary.frames_sent,
        summary.phases_completed,
        phases.len()
    );
    Ok(summary)
}

fn send_round<B: GpioBackend, T: TimingSource>(
    esc: &EscDriver<B, T>,
    pins: &[u32],
    throttle: u16,
    summary: &mut RunSummary,
) -> Result<()> {
    for &pin in pins {
        esc.send(throttle, pin)?;
        summary.frames_sent += 1;
    }
    Ok(())
}
