//! Continuous playback drift correction and stall recovery.
//!
//! The authoritative position of the broadcast is only ever known as an
//! (offset, timestamp) pair from the last snapshot. The corrector
//! extrapolates that basis to "now", compares against the local media
//! clock, and issues a corrective seek when the difference is worth the
//! audible glitch. A tight threshold applies at load/seek-ready moments,
//! where joining on time matters most; a looser one applies to
//! steady-state heartbeat corrections, where eager seeking would stutter.

use crate::time::elapsed_secs;
use tracing::debug;

/// The authoritative playback basis extracted from the last snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftBasis {
    pub offset: f64,
    pub timestamp: i64,
    pub playing: bool,
}

/// Correction thresholds in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftThresholds {
    pub initial_secs: f64,
    pub steady_secs: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            initial_secs: 1.5,
            steady_secs: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Steady,
}

/// Stateful drift evaluator for one audio channel.
#[derive(Debug)]
pub struct DriftCorrector {
    thresholds: DriftThresholds,
    basis: Option<DriftBasis>,
    phase: Phase,
}

impl DriftCorrector {
    #[must_use]
    pub fn new(thresholds: DriftThresholds) -> Self {
        Self {
            thresholds,
            basis: None,
            phase: Phase::Initial,
        }
    }

    /// Install a new authoritative basis from a snapshot.
    pub fn set_basis(&mut self, basis: DriftBasis) {
        self.basis = Some(basis);
    }

    pub fn clear_basis(&mut self) {
        self.basis = None;
    }

    /// Arm the tight threshold for the next evaluation. Called when a new
    /// source becomes seekable, the moment a precise join is cheapest.
    pub fn mark_ready(&mut self) {
        self.phase = Phase::Initial;
    }

    /// The position the broadcast should be at right now.
    #[must_use]
    pub fn expected_position(&self, now_ms: i64) -> Option<f64> {
        self.basis.map(|basis| {
            if basis.playing {
                (basis.offset + elapsed_secs(basis.timestamp, now_ms)).max(0.0)
            } else {
                basis.offset.max(0.0)
            }
        })
    }

    /// Compare the local position against the extrapolated authoritative
    /// one. Returns the seek target when the drift exceeds the current
    /// threshold, `None` otherwise. Evaluating twice in a row with no new
    /// state cannot request a second seek, because a corrected position
    /// lands inside the tolerance band.
    pub fn evaluate(&mut self, local_position: f64, now_ms: i64) -> Option<f64> {
        let expected = self.expected_position(now_ms)?;
        let threshold = match self.phase {
            Phase::Initial => self.thresholds.initial_secs,
            Phase::Steady => self.thresholds.steady_secs,
        };
        self.phase = Phase::Steady;

        let drift = (local_position - expected).abs();
        if drift > threshold {
            debug!(
                "Drift {:.2}s exceeds {:.2}s threshold, seeking to {:.2}",
                drift, threshold, expected
            );
            Some(expected)
        } else {
            None
        }
    }
}

/// What the stall watchdog wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAction {
    None,
    /// Playback should be running but is not progressing; try `play()`.
    RetryPlay,
    /// The retry did not help; reload the source and try again.
    ReloadSource,
}

/// Detects a media element that should be playing but is not progressing.
#[derive(Debug)]
pub struct StallWatchdog {
    last_position: Option<f64>,
    stalled_checks: u32,
    retried: bool,
    check_limit: u32,
}

impl StallWatchdog {
    #[must_use]
    pub fn new(check_limit: u32) -> Self {
        Self {
            last_position: None,
            stalled_checks: 0,
            retried: false,
            check_limit: check_limit.max(1),
        }
    }

    /// Feed one observation. `should_play` is whether the authoritative
    /// state says audio is rolling.
    pub fn check(&mut self, should_play: bool, position: f64) -> StallAction {
        if !should_play {
            self.reset();
            return StallAction::None;
        }

        let progressed = match self.last_position {
            Some(previous) => (position - previous).abs() > 1e-3,
            None => true,
        };
        self.last_position = Some(position);

        if progressed {
            self.stalled_checks = 0;
            self.retried = false;
            return StallAction::None;
        }

        self.stalled_checks += 1;
        if self.stalled_checks < self.check_limit {
            return StallAction::None;
        }

        self.stalled_checks = 0;
        if self.retried {
            self.retried = false;
            StallAction::ReloadSource
        } else {
            self.retried = true;
            StallAction::RetryPlay
        }
    }

    pub fn reset(&mut self) {
        self.last_position = None;
        self.stalled_checks = 0;
        self.retried = false;
    }
}
