//! Media clock model: reference snapshots, selections and the clip catalog.
//!
//! The authority never streams its playhead. It publishes a
//! [`MediaReferenceSnapshot`] whenever playback state changes, and every peer
//! extrapolates the current position from it:
//!
//! ```text
//! expected(now) = playing ? base_media + max(0, now - base_wall) * speed
//!                         : base_media
//! ```
//!
//! clamped to `[0, duration - END_EPSILON]` so a playhead never wraps back
//! to the start.

use crate::{Error, PeerId, Result, SessionTime};

/// Distance from the end of a clip that counts as "ended", in seconds.
pub const END_EPSILON: f64 = 0.05;

/// Clamp a media time into the playable range of a clip.
///
/// `duration` of `None` or `<= 0` means the clip is not loaded yet; only the
/// lower bound applies.
pub fn clamp_media_time(time: f64, duration: Option<f64>) -> f64 {
    let time = if time.is_finite() { time.max(0.0) } else { 0.0 };
    match duration {
        Some(d) if d > 0.0 => time.min(end_time(d)),
        _ => time,
    }
}

/// Last playable position of a clip.
pub fn end_time(duration: f64) -> f64 {
    (duration - END_EPSILON).max(0.0)
}

/// True when `time` is within [`END_EPSILON`] of the end of the clip.
pub fn is_at_end(time: f64, duration: f64) -> bool {
    duration > 0.0 && time >= duration - END_EPSILON
}

// ============================================================================
// Snapshot Ordering
// ============================================================================

/// Highest stamp version a receiver accepts.
pub const MAX_STAMP_VERSION: u64 = 1 << 48;

/// How far ahead of the newest held stamp an inbound version may jump.
pub const MAX_STAMP_LEAD: u64 = 1 << 20;

/// Monotonic order of authority broadcasts.
///
/// Compared as `(version, issuer)`. An authority issues one more than the
/// highest version it has seen, so a newly promoted teacher always
/// supersedes; `issuer` breaks ties between two peers that raced in the same
/// tick, identically on every receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotStamp {
    pub version: u64,
    pub issuer: PeerId,
}

impl SnapshotStamp {
    pub fn new(version: u64, issuer: PeerId) -> Self {
        Self { version, issuer }
    }

    /// The stamp `issuer` should put on its next broadcast. Saturates at
    /// `u64::MAX`; receivers refuse versions above [`MAX_STAMP_VERSION`] so a
    /// live room never gets there.
    pub fn next(self, issuer: PeerId) -> Self {
        Self {
            version: self.version.saturating_add(1),
            issuer,
        }
    }

    /// True when `self` is a plausible successor of `newest`: within
    /// [`MAX_STAMP_LEAD`] versions of it and below [`MAX_STAMP_VERSION`].
    pub fn is_plausible_after(&self, newest: Option<SnapshotStamp>) -> bool {
        if self.version > MAX_STAMP_VERSION {
            return false;
        }
        newest.is_none_or(|n| self.version <= n.version.saturating_add(MAX_STAMP_LEAD))
    }
}

// ============================================================================
// Reference Snapshot
// ============================================================================

/// Authoritative playback reference, enough to extrapolate the playhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaReferenceSnapshot {
    pub stamp: SnapshotStamp,
    /// Owner's playhead when the snapshot was taken.
    pub base_media_time: f64,
    /// Session clock reading when the snapshot was taken.
    pub base_wall_clock_time: SessionTime,
    pub playing: bool,
    pub playback_speed: f64,
}

impl MediaReferenceSnapshot {
    /// Reference for a freshly selected clip: time 0, paused, normal speed.
    pub fn reset(stamp: SnapshotStamp, now: SessionTime) -> Self {
        Self {
            stamp,
            base_media_time: 0.0,
            base_wall_clock_time: now,
            playing: false,
            playback_speed: 1.0,
        }
    }

    /// Where the playhead should be at `now`.
    pub fn expected_time(&self, now: SessionTime, duration: Option<f64>) -> f64 {
        if !self.playing {
            return clamp_media_time(self.base_media_time, duration);
        }

        let elapsed = (now - self.base_wall_clock_time).max(0.0);
        clamp_media_time(
            self.base_media_time + elapsed * self.playback_speed,
            duration,
        )
    }

    /// True if `self` should replace `current` on a receiver.
    pub fn supersedes(&self, current: &Self) -> bool {
        self.stamp > current.stamp
    }
}

impl Default for MediaReferenceSnapshot {
    fn default() -> Self {
        Self::reset(SnapshotStamp::default(), 0.0)
    }
}

/// Volume and mute, replicated on their own lightweight channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioState {
    /// Linear volume in `[0, 1]`.
    pub volume: f32,
    pub muted: bool,
}

impl AudioState {
    pub fn new(volume: f32, muted: bool) -> Self {
        Self {
            volume: clamp_volume(volume),
            muted,
        }
    }
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
        }
    }
}

/// Clamp to `[0, 1]`, mapping NaN to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Catalog & Selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipSourceKind {
    Url,
    LocalAsset,
}

/// Where a clip's media comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClipSource {
    /// Streamed from a URL.
    Url(String),
    /// Bundled with the application, addressed by asset name.
    LocalAsset(String),
}

impl ClipSource {
    pub fn kind(&self) -> ClipSourceKind {
        match self {
            Self::Url(_) => ClipSourceKind::Url,
            Self::LocalAsset(_) => ClipSourceKind::LocalAsset,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Url(id) | Self::LocalAsset(id) => id,
        }
    }

    pub fn from_parts(kind: ClipSourceKind, identifier: impl Into<String>) -> Self {
        match kind {
            ClipSourceKind::Url => Self::Url(identifier.into()),
            ClipSourceKind::LocalAsset => Self::LocalAsset(identifier.into()),
        }
    }
}

/// One selectable clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipEntry {
    pub name: String,
    pub source: ClipSource,
    /// Bookmark timestamps, sorted ascending.
    bookmarks: Vec<f64>,
}

impl ClipEntry {
    /// Build an entry; non-finite or negative bookmarks are discarded and
    /// the rest sorted.
    pub fn new(name: impl Into<String>, source: ClipSource, bookmarks: Vec<f64>) -> Self {
        let mut bookmarks: Vec<f64> = bookmarks
            .into_iter()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .collect();
        bookmarks.sort_by(f64::total_cmp);
        bookmarks.dedup();

        Self {
            name: name.into(),
            source,
            bookmarks,
        }
    }

    pub fn bookmarks(&self) -> &[f64] {
        &self.bookmarks
    }
}

/// The ordered list of clips the teacher can pick from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaCatalog {
    entries: Vec<ClipEntry>,
}

impl MediaCatalog {
    pub fn new(entries: Vec<ClipEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, index: usize) -> Option<&ClipEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClipEntry> {
        self.entries.iter()
    }
}

/// The session's single active clip selection.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSelection {
    pub stamp: SnapshotStamp,
    pub selected_index: usize,
    pub source: ClipSource,
    pub audio: AudioState,
}

impl MediaSelection {
    pub fn new(stamp: SnapshotStamp, selected_index: usize, source: ClipSource) -> Self {
        Self {
            stamp,
            selected_index,
            source,
            audio: AudioState::default(),
        }
    }

    pub fn clip_source_kind(&self) -> ClipSourceKind {
        self.source.kind()
    }

    pub fn clip_identifier(&self) -> &str {
        self.source.identifier()
    }
}

/// Validate a duration reported by a media backend.
pub fn checked_duration(duration: f64) -> Result<f64> {
    if duration.is_finite() && duration >= 0.0 {
        Ok(duration)
    } else {
        Err(Error::InvalidDuration(duration))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const CLIP: f64 = 120.0;

    fn playing_at(base: f64, wall: f64, speed: f64) -> MediaReferenceSnapshot {
        MediaReferenceSnapshot {
            stamp: SnapshotStamp::new(1, 1),
            base_media_time: base,
            base_wall_clock_time: wall,
            playing: true,
            playback_speed: speed,
        }
    }

    #[test]
    fn test_expected_time_extrapolates_while_playing() {
        let snap = playing_at(10.0, 100.0, 1.0);
        assert_eq!(snap.expected_time(103.5, Some(CLIP)), 13.5);

        let fast = playing_at(10.0, 100.0, 2.0);
        assert_eq!(fast.expected_time(103.0, Some(CLIP)), 16.0);
    }

    #[test]
    fn test_expected_time_frozen_while_paused() {
        let snap = MediaReferenceSnapshot {
            playing: false,
            ..playing_at(42.0, 0.0, 1.0)
        };
        assert_eq!(snap.expected_time(1_000.0, Some(CLIP)), 42.0);
    }

    #[test]
    fn test_expected_time_ignores_clock_behind_base() {
        let snap = playing_at(10.0, 100.0, 1.0);
        assert_eq!(snap.expected_time(99.0, Some(CLIP)), 10.0);
    }

    #[test]
    fn test_expected_time_clamped_below_end() {
        let snap = playing_at(119.0, 0.0, 1.0);
        assert_eq!(snap.expected_time(50.0, Some(CLIP)), CLIP - END_EPSILON);
    }

    #[test]
    fn test_unknown_duration_only_clamps_low() {
        assert_eq!(clamp_media_time(500.0, None), 500.0);
        assert_eq!(clamp_media_time(-3.0, None), 0.0);
        assert_eq!(clamp_media_time(f64::NAN, Some(CLIP)), 0.0);
    }

    #[test]
    fn test_is_at_end() {
        assert!(is_at_end(CLIP - 0.01, CLIP));
        assert!(is_at_end(CLIP - END_EPSILON, CLIP));
        assert!(!is_at_end(CLIP - 1.0, CLIP));
        assert!(!is_at_end(0.0, 0.0));
    }

    #[test]
    fn test_stamp_ordering() {
        let a = SnapshotStamp::new(4, 9);
        let b = SnapshotStamp::new(5, 1);
        assert!(b > a, "version dominates issuer");
        assert!(SnapshotStamp::new(5, 2) > b, "issuer breaks ties");
        assert_eq!(a.next(3), SnapshotStamp::new(5, 3));
    }

    #[test]
    fn test_next_saturates_at_max_version() {
        let top = SnapshotStamp::new(u64::MAX, 9);
        assert_eq!(top.next(2), SnapshotStamp::new(u64::MAX, 2));
    }

    #[test]
    fn test_implausible_stamps() {
        let newest = Some(SnapshotStamp::new(10, 1));
        assert!(SnapshotStamp::new(11, 2).is_plausible_after(newest));
        assert!(SnapshotStamp::new(10 + MAX_STAMP_LEAD, 2).is_plausible_after(newest));
        assert!(!SnapshotStamp::new(11 + MAX_STAMP_LEAD, 2).is_plausible_after(newest));
        assert!(!SnapshotStamp::new(u64::MAX, 2).is_plausible_after(None));
        assert!(SnapshotStamp::new(MAX_STAMP_VERSION, 2).is_plausible_after(None));
    }

    #[test]
    fn test_supersedes_requires_strictly_newer() {
        let old = playing_at(0.0, 0.0, 1.0);
        let same = MediaReferenceSnapshot {
            base_media_time: 5.0,
            ..old
        };
        assert!(!same.supersedes(&old));

        let newer = MediaReferenceSnapshot {
            stamp: old.stamp.next(1),
            ..old
        };
        assert!(newer.supersedes(&old));
        assert!(!old.supersedes(&newer));
    }

    #[test]
    fn test_clip_entry_sorts_bookmarks() {
        let entry = ClipEntry::new(
            "Cells",
            ClipSource::LocalAsset("cells.mp4".into()),
            vec![30.0, f64::NAN, 5.0, -1.0, 30.0, 12.5],
        );
        assert_eq!(entry.bookmarks(), &[5.0, 12.5, 30.0]);
    }

    #[test]
    fn test_clip_source_parts() {
        let src = ClipSource::from_parts(ClipSourceKind::Url, "https://cdn/x.mp4");
        assert_eq!(src.kind(), ClipSourceKind::Url);
        assert_eq!(src.identifier(), "https://cdn/x.mp4");
    }

    #[test]
    fn test_audio_state_clamps_volume() {
        assert_eq!(AudioState::new(1.7, false).volume, 1.0);
        assert_eq!(AudioState::new(-0.2, true).volume, 0.0);
        assert_eq!(AudioState::new(f32::NAN, false).volume, 0.0);
    }

    #[test]
    fn test_checked_duration() {
        assert_eq!(checked_duration(12.0), Ok(12.0));
        assert!(checked_duration(f64::INFINITY).is_err());
        assert!(checked_duration(-1.0).is_err());
    }

    proptest! {
        /// Expected time stays in the playable range for any reference and
        /// any clock reading at or after the base.
        #[test]
        fn prop_expected_time_in_range(
            base in -50.0f64..500.0,
            wall in 0.0f64..10_000.0,
            ahead in 0.0f64..10_000.0,
            speed in 0.0f64..4.0,
            playing in any::<bool>(),
            duration in 0.1f64..3_600.0,
        ) {
            let snap = MediaReferenceSnapshot {
                stamp: SnapshotStamp::default(),
                base_media_time: base,
                base_wall_clock_time: wall,
                playing,
                playback_speed: speed,
            };
            let t = snap.expected_time(wall + ahead, Some(duration));
            prop_assert!(t >= 0.0);
            prop_assert!(t <= end_time(duration));
        }
    }
}
