//! Client-side drift correction.
//!
//! A non-authoritative peer compares its local playhead with the time the
//! reference snapshot predicts and picks one of three corrections each tick:
//! jump straight to the expected time, nudge the playback rate, or play at the
//! reference rate.

use tracing::debug;

use crate::SessionTime;

/// Difference above which the local playhead is moved outright, in seconds.
pub const DEFAULT_HARD_SNAP_THRESHOLD: f64 = 0.150;

/// Difference above which the playback rate is biased, in seconds.
pub const DEFAULT_SOFT_CORRECTION_THRESHOLD: f64 = 0.030;

/// Largest rate bias applied by a soft correction.
pub const DEFAULT_MAX_RATE_DRIFT: f64 = 0.02;

/// Minimum spacing between two hard snaps, in seconds.
pub const DEFAULT_SNAP_THROTTLE_SECS: f64 = 0.5;

/// Fraction of the difference converted into rate bias.
const RATE_GAIN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftConfig {
    pub hard_snap_threshold: f64,
    pub soft_correction_threshold: f64,
    pub max_rate_drift: f64,
    pub snap_throttle_secs: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            hard_snap_threshold: DEFAULT_HARD_SNAP_THRESHOLD,
            soft_correction_threshold: DEFAULT_SOFT_CORRECTION_THRESHOLD,
            max_rate_drift: DEFAULT_MAX_RATE_DRIFT,
            snap_throttle_secs: DEFAULT_SNAP_THROTTLE_SECS,
        }
    }
}

/// What the peer should do to its local player this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Set the local playhead to `to`.
    HardSnap { to: f64 },
    /// Play at `speed`, which is the reference speed plus `bias`.
    RateBias { speed: f64, bias: f64 },
    /// Play at the reference speed.
    BaseRate { speed: f64 },
}

impl Correction {
    /// Playback speed the local player should end up at, if the correction
    /// sets one.
    pub fn speed(&self) -> Option<f64> {
        match *self {
            Self::HardSnap { .. } => None,
            Self::RateBias { speed, .. } | Self::BaseRate { speed } => Some(speed),
        }
    }
}

/// Stateful corrector; remembers when it last snapped.
#[derive(Debug, Clone)]
pub struct DriftCorrector {
    config: DriftConfig,
    last_snap_at: Option<SessionTime>,
}

impl DriftCorrector {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            last_snap_at: None,
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn last_snap_at(&self) -> Option<SessionTime> {
        self.last_snap_at
    }

    /// Forget the snap history, e.g. after a clip change.
    pub fn reset(&mut self) {
        self.last_snap_at = None;
    }

    /// Choose the correction for one tick.
    ///
    /// A hard snap inside the throttle window falls through to a rate bias
    /// when playing, so a large gap still closes between snaps.
    pub fn correct(
        &mut self,
        expected: f64,
        local: f64,
        playing: bool,
        base_speed: f64,
        now: SessionTime,
    ) -> Correction {
        let diff = expected - local;
        let magnitude = diff.abs();

        if magnitude > self.config.hard_snap_threshold {
            let throttled = self
                .last_snap_at
                .is_some_and(|at| now - at < self.config.snap_throttle_secs);

            if !throttled {
                debug!(expected, local, diff, "drift hard snap");
                self.last_snap_at = Some(now);
                return Correction::HardSnap { to: expected };
            }

            if playing && self.config.max_rate_drift > 0.0 {
                return self.bias(diff, base_speed);
            }
            return Correction::BaseRate { speed: base_speed };
        }

        if magnitude > self.config.soft_correction_threshold && playing {
            return self.bias(diff, base_speed);
        }

        Correction::BaseRate { speed: base_speed }
    }

    fn bias(&self, diff: f64, base_speed: f64) -> Correction {
        let max = self.config.max_rate_drift;
        let bias = (diff * RATE_GAIN).clamp(-max, max);
        Correction::RateBias {
            speed: base_speed + bias,
            bias,
        }
    }
}

impl Default for DriftCorrector {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
