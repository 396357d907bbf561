//! Clip prepare and seek-settle job.
//!
//! Loading a clip and landing on a seek target both take an unknown number of
//! ticks. [`PrepareJob`] tracks that wait as a small state machine the owner
//! polls once per tick:
//!
//! ```text
//! Idle --start--> Preparing --ready--> (caller seeks) --begin_settle--> Settling
//!                     |                                                   |
//!                  timeout                                        within tolerance
//!                     v                                             or timeout
//!                   Idle <---------------------------------------------- +
//! ```
//!
//! The buffering indicator is shown for as long as the job is not idle. A new
//! `start` cancels whatever was in flight.

use tracing::debug;

use crate::SessionTime;

pub const DEFAULT_PREPARE_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_SETTLE_TIMEOUT_SECS: f64 = 2.0;
pub const DEFAULT_SETTLE_TOLERANCE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreparePhase {
    Idle,
    Preparing { since: SessionTime },
    Settling { target: f64, since: SessionTime },
}

/// Result of polling the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparePoll {
    /// Not preparing.
    Idle,
    Waiting,
    /// The backend is prepared. The job is idle until `begin_settle`.
    Ready,
    /// Gave up; the job is idle and the caller keeps its prior state.
    TimedOut,
}

/// Result of polling the settle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePoll {
    /// Not settling.
    Idle,
    Waiting,
    Settled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PrepareJob {
    phase: PreparePhase,
    prepare_timeout: f64,
    settle_timeout: f64,
    settle_tolerance: f64,
}

impl PrepareJob {
    /// # Panics
    ///
    /// Panics if either timeout is not positive or the tolerance is negative.
    pub fn new(prepare_timeout: f64, settle_timeout: f64, settle_tolerance: f64) -> Self {
        assert!(prepare_timeout > 0.0, "prepare timeout must be positive");
        assert!(settle_timeout > 0.0, "settle timeout must be positive");
        assert!(settle_tolerance >= 0.0, "settle tolerance must be non-negative");

        Self {
            phase: PreparePhase::Idle,
            prepare_timeout,
            settle_timeout,
            settle_tolerance,
        }
    }

    pub fn phase(&self) -> PreparePhase {
        self.phase
    }

    /// True while the buffering indicator should be visible.
    pub fn buffering(&self) -> bool {
        self.phase != PreparePhase::Idle
    }

    pub fn settle_tolerance(&self) -> f64 {
        self.settle_tolerance
    }

    /// Begin waiting for the backend to prepare. Returns true if an earlier
    /// prepare or settle was cancelled.
    pub fn start(&mut self, now: SessionTime) -> bool {
        let cancelled = self.buffering();
        if cancelled {
            debug!(phase = ?self.phase, "prepare superseded");
        }
        self.phase = PreparePhase::Preparing { since: now };
        cancelled
    }

    /// Begin waiting for the playhead to reach `target`. Cancels any prepare
    /// still in flight.
    pub fn begin_settle(&mut self, target: f64, now: SessionTime) {
        self.phase = PreparePhase::Settling { target, since: now };
    }

    pub fn cancel(&mut self) {
        self.phase = PreparePhase::Idle;
    }

    pub fn poll_prepare(&mut self, is_prepared: bool, now: SessionTime) -> PreparePoll {
        let PreparePhase::Preparing { since } = self.phase else {
            return PreparePoll::Idle;
        };

        if is_prepared {
            self.phase = PreparePhase::Idle;
            return PreparePoll::Ready;
        }
        if now - since >= self.prepare_timeout {
            debug!(waited = now - since, "prepare timed out");
            self.phase = PreparePhase::Idle;
            return PreparePoll::TimedOut;
        }
        PreparePoll::Waiting
    }

    pub fn poll_settle(&mut self, local_time: f64, now: SessionTime) -> SettlePoll {
        let PreparePhase::Settling { target, since } = self.phase else {
            return SettlePoll::Idle;
        };

        if (local_time - target).abs() <= self.settle_tolerance {
            self.phase = PreparePhase::Idle;
            return SettlePoll::Settled;
        }
        if now - since >= self.settle_timeout {
            debug!(target, local_time, "seek settle timed out");
            self.phase = PreparePhase::Idle;
            return SettlePoll::TimedOut;
        }
        SettlePoll::Waiting
    }
}

impl Default for PrepareJob {
    fn default() -> Self {
        Self::new(
            DEFAULT_PREPARE_TIMEOUT_SECS,
            DEFAULT_SETTLE_TIMEOUT_SECS,
            DEFAULT_SETTLE_TOLERANCE_SECS,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_idle() {
        let mut job = PrepareJob::default();
        assert!(!job.buffering());
        assert_eq!(job.poll_prepare(true, 0.0), PreparePoll::Idle);
        assert_eq!(job.poll_settle(0.0, 0.0), SettlePoll::Idle);
    }

    #[test]
    fn test_prepare_then_settle() {
        let mut job = PrepareJob::default();
        assert!(!job.start(1.0));
        assert!(job.buffering());

        assert_eq!(job.poll_prepare(false, 2.0), PreparePoll::Waiting);
        assert_eq!(job.poll_prepare(true, 3.0), PreparePoll::Ready);

        job.begin_settle(30.0, 3.0);
        assert!(job.buffering(), "indicator stays up through the seek");
        assert_eq!(job.poll_settle(12.0, 3.5), SettlePoll::Waiting);
        assert_eq!(job.poll_settle(29.6, 3.6), SettlePoll::Settled);
        assert!(!job.buffering());
    }

    #[test]
    fn test_prepare_timeout_returns_to_idle() {
        let mut job = PrepareJob::default();
        job.start(0.0);
        assert_eq!(job.poll_prepare(false, 9.99), PreparePoll::Waiting);
        assert_eq!(job.poll_prepare(false, 10.0), PreparePoll::TimedOut);
        assert!(!job.buffering());
        assert_eq!(job.poll_prepare(true, 10.1), PreparePoll::Idle);
    }

    #[test]
    fn test_settle_timeout() {
        let mut job = PrepareJob::default();
        job.begin_settle(50.0, 0.0);
        assert_eq!(job.poll_settle(0.0, 1.0), SettlePoll::Waiting);
        assert_eq!(job.poll_settle(0.0, 2.0), SettlePoll::TimedOut);
        assert!(!job.buffering());
    }

    #[test]
    fn test_restart_cancels_previous() {
        let mut job = PrepareJob::default();
        job.start(0.0);
        assert!(job.start(8.0), "second start supersedes the first");
        // Budget counts from the second start.
        assert_eq!(job.poll_prepare(false, 12.0), PreparePoll::Waiting);
        assert_eq!(job.poll_prepare(false, 18.0), PreparePoll::TimedOut);
    }

    #[test]
    #[should_panic(expected = "prepare timeout must be positive")]
    fn test_zero_prepare_timeout_panics() {
        PrepareJob::new(0.0, 2.0, 0.5);
    }
}
