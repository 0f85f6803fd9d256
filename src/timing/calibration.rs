//! # Busy-Wait Calibration
//!
//! Converts nanosecond durations into spin-loop iteration counts.
//!
//! A single measurement can land on a timeslice boundary or an interrupt and
//! come out badly skewed, so several short trials are timed and the median
//! elapsed time is used.

use serde::Deserialize;
use tracing::{debug, warn};

use super::TimingSource;

/// Calibration measurement parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CalibrationSettings {
    /// Number of timed trials (the median is used)
    #[serde(default = "default_trials")]
    pub trials: usize,

    /// Spin iterations per trial
    #[serde(default = "default_spin_iterations")]
    pub spin_iterations: u64,
}

fn default_trials() -> usize { 7 }
fn default_spin_iterations() -> u64 { 200_000 }

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            spin_iterations: default_spin_iterations(),
        }
    }
}

/// Measured busy-wait rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    iterations_per_ns: f64,
}

impl Calibration {
    /// Build a calibration from a known rate
    ///
    /// Non-finite or non-positive rates are replaced by the smallest positive
    /// rate, which turns every high phase into a zero-iteration spin. That is
    /// logged as a warning.
    pub fn from_iterations_per_ns(iterations_per_ns: f64) -> Self {
        if iterations_per_ns.is_finite() && iterations_per_ns > 0.0 {
            return Self { iterations_per_ns };
        }

        warn!(
            "Invalid busy-wait rate {} iterations/ns, high phases will not spin",
            iterations_per_ns
        );
        Self {
            iterations_per_ns: f64::MIN_POSITIVE,
        }
    }

    /// Time `settings.trials` spins against `timing` and keep the median
    ///
    /// One untimed warm-up spin runs first so page faults and frequency
    /// ramp-up do not land in a trial.
    pub fn measure<T: TimingSource + ?Sized>(timing: &T, settings: &CalibrationSettings) -> Self {
        let trials = settings.trials.max(1);
        let iterations = settings.spin_iterations.max(1);

        timing.spin(iterations);

        let mut elapsed: Vec<u64> = (0..trials)
            .map(|_| {
                let start = timing.now_ns();
                timing.spin(iterations);
                timing.now_ns().saturating_sub(start).max(1)
            })
            .collect();
        elapsed.sort_unstable();

        let median_ns = elapsed[elapsed.len() / 2];
        let calibration = Self::from_iterations_per_ns(iterations as f64 / median_ns as f64);

        debug!(
            "Calibrated busy-wait: {} iterations in {} ns (median of {}), {:.4} iterations/ns",
            iterations, median_ns, trials, calibration.iterations_per_ns
        );

        calibration
    }

    /// Spin iterations per nanosecond
    pub fn iterations_per_ns(&self) -> f64 {
        self.iterations_per_ns
    }

    /// Iterations needed to cover `ns`, rounded down so a pulse is never long
    pub fn iterations_for(&self, ns: u64) -> u64 {
        (ns as f64 * self.iterations_per_ns).floor() as u64
    }

    /// Duration covered by `iterations`, in nanoseconds
    pub fn ns_for(&self, iterations: u64) -> f64 {
        iterations as f64 / self.iterations_per_ns
    }
}
