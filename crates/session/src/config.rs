//! Session configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! [authority]
//! timeout_secs = 2.0
//!
//! [media]
//! hard_snap_threshold = 0.150
//! skip_step_secs = 10.0
//!
//! [canvas]
//! max_scale = 3.0
//!
//! [events]
//! queue_limit = 1024
//!
//! [logging]
//! level = "debug"
//! json = false
//! ```

use std::path::Path;

use glam::Vec3;
use lectern_core::bookmark::DEFAULT_MARK_GUARD_SECS;
use lectern_core::drift::{
    DEFAULT_HARD_SNAP_THRESHOLD, DEFAULT_MAX_RATE_DRIFT, DEFAULT_SNAP_THROTTLE_SECS,
    DEFAULT_SOFT_CORRECTION_THRESHOLD,
};
use lectern_core::ownership::AUTHORITY_TIMEOUT_SECS;
use lectern_core::prepare::{
    DEFAULT_PREPARE_TIMEOUT_SECS, DEFAULT_SETTLE_TIMEOUT_SECS, DEFAULT_SETTLE_TOLERANCE_SECS,
};
use lectern_core::transform::{DEFAULT_MAX_SCALE, DEFAULT_MIN_SCALE, DEFAULT_PITCH_CLAMP_DEG};
use lectern_core::{DriftConfig, PrepareJob, RoomBounds};
use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_QUEUE_LIMIT;
use crate::error::{Result, SessionError};

/// Default seek distance for fast forward / fast backward, in seconds.
pub const DEFAULT_SKIP_STEP_SECS: f64 = 10.0;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub authority: AuthorityConfig,
    pub media: MediaSyncConfig,
    pub canvas: CanvasConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Budget for an authority handoff before the parked action is dropped.
    pub timeout_secs: f64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: AUTHORITY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSyncConfig {
    pub hard_snap_threshold: f64,
    pub soft_correction_threshold: f64,
    pub max_rate_drift: f64,
    pub snap_throttle_secs: f64,
    pub skip_step_secs: f64,
    pub prepare_timeout_secs: f64,
    pub settle_timeout_secs: f64,
    pub settle_tolerance_secs: f64,
    pub mark_guard_secs: f64,
}

impl Default for MediaSyncConfig {
    fn default() -> Self {
        Self {
            hard_snap_threshold: DEFAULT_HARD_SNAP_THRESHOLD,
            soft_correction_threshold: DEFAULT_SOFT_CORRECTION_THRESHOLD,
            max_rate_drift: DEFAULT_MAX_RATE_DRIFT,
            snap_throttle_secs: DEFAULT_SNAP_THROTTLE_SECS,
            skip_step_secs: DEFAULT_SKIP_STEP_SECS,
            prepare_timeout_secs: DEFAULT_PREPARE_TIMEOUT_SECS,
            settle_timeout_secs: DEFAULT_SETTLE_TIMEOUT_SECS,
            settle_tolerance_secs: DEFAULT_SETTLE_TOLERANCE_SECS,
            mark_guard_secs: DEFAULT_MARK_GUARD_SECS,
        }
    }
}

impl MediaSyncConfig {
    pub fn drift(&self) -> DriftConfig {
        DriftConfig {
            hard_snap_threshold: self.hard_snap_threshold,
            soft_correction_threshold: self.soft_correction_threshold,
            max_rate_drift: self.max_rate_drift,
            snap_throttle_secs: self.snap_throttle_secs,
        }
    }

    pub fn prepare_job(&self) -> PrepareJob {
        PrepareJob::new(
            self.prepare_timeout_secs,
            self.settle_timeout_secs,
            self.settle_tolerance_secs,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub min_scale: f32,
    pub max_scale: f32,
    pub pitch_clamp_deg: f32,
    /// Opposite corners of the room volume. Unbounded when absent.
    pub room_min: Option<[f32; 3]>,
    pub room_max: Option<[f32; 3]>,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            min_scale: DEFAULT_MIN_SCALE,
            max_scale: DEFAULT_MAX_SCALE,
            pitch_clamp_deg: DEFAULT_PITCH_CLAMP_DEG,
            room_min: None,
            room_max: None,
        }
    }
}

impl CanvasConfig {
    pub fn room_bounds(&self) -> Option<RoomBounds> {
        match (self.room_min, self.room_max) {
            (Some(a), Some(b)) => Some(RoomBounds::new(Vec3::from_array(a), Vec3::from_array(b))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Undrained events kept per subscriber; older ones are dropped.
    pub queue_limit: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SessionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SessionError::InvalidConfig(msg.to_string()));

        if !positive(self.authority.timeout_secs) {
            return invalid("authority.timeout_secs must be positive");
        }

        let m = &self.media;
        if !positive(m.prepare_timeout_secs) || !positive(m.settle_timeout_secs) {
            return invalid("media prepare and settle timeouts must be positive");
        }
        if !positive(m.skip_step_secs) {
            return invalid("media.skip_step_secs must be positive");
        }
        if !non_negative(m.hard_snap_threshold)
            || !non_negative(m.soft_correction_threshold)
            || !non_negative(m.max_rate_drift)
            || !non_negative(m.snap_throttle_secs)
            || !non_negative(m.settle_tolerance_secs)
            || !non_negative(m.mark_guard_secs)
        {
            return invalid("media thresholds must be non-negative");
        }
        if m.soft_correction_threshold > m.hard_snap_threshold {
            return invalid("media.soft_correction_threshold exceeds hard_snap_threshold");
        }

        let c = &self.canvas;
        if !(c.min_scale > 0.0 && c.min_scale <= c.max_scale) {
            return invalid("canvas scale range must satisfy 0 < min_scale <= max_scale");
        }
        if !(c.pitch_clamp_deg > 0.0 && c.pitch_clamp_deg < 90.0) {
            return invalid("canvas.pitch_clamp_deg must be within (0, 90)");
        }
        if c.room_min.is_some() != c.room_max.is_some() {
            return invalid("canvas.room_min and room_max must be set together");
        }

        if self.events.queue_limit == 0 {
            return invalid("events.queue_limit must be positive");
        }

        Ok(())
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.authority.timeout_secs, 2.0);
        assert_eq!(config.media.hard_snap_threshold, 0.150);
        assert_eq!(config.media.soft_correction_threshold, 0.030);
        assert_eq!(config.media.max_rate_drift, 0.02);
        assert_eq!(config.media.prepare_timeout_secs, 10.0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_override() {
        let config = SessionConfig::from_toml_str(
            r#"
            [media]
            skip_step_secs = 5.0

            [canvas]
            room_min = [-4.0, 0.0, -4.0]
            room_max = [4.0, 3.0, 4.0]

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.media.skip_step_secs, 5.0);
        assert_eq!(config.media.hard_snap_threshold, DEFAULT_HARD_SNAP_THRESHOLD);
        assert!(config.logging.json);
        let room = config.canvas.room_bounds().unwrap();
        assert_eq!(room.max, Vec3::new(4.0, 3.0, 4.0));
    }

    #[test]
    fn test_soft_above_hard_rejected() {
        let err = SessionConfig::from_toml_str(
            r#"
            [media]
            soft_correction_threshold = 0.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn test_non_positive_budget_rejected() {
        let mut config = SessionConfig::default();
        config.authority.timeout_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.media.prepare_timeout_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_room_rejected() {
        let mut config = SessionConfig::default();
        config.canvas.room_min = Some([0.0; 3]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_queue_limit() {
        let config = SessionConfig::from_toml_str("[events]\nqueue_limit = 16\n").unwrap();
        assert_eq!(config.events.queue_limit, 16);
        assert_eq!(SessionConfig::default().events.queue_limit, DEFAULT_QUEUE_LIMIT);
        assert!(SessionConfig::from_toml_str("[events]\nqueue_limit = 0\n").is_err());
    }

    #[test]
    fn test_parse_error_surfaces() {
        let err = SessionConfig::from_toml_str("[media\n").unwrap_err();
        assert!(matches!(err, SessionError::ConfigParse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SessionConfig::load("/nonexistent/lectern.toml").unwrap_err();
        assert!(matches!(err, SessionError::ConfigRead { .. }));
    }
}
