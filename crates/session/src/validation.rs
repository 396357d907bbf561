//! Inbound message validation.
//!
//! Rules:
//! - Missing payload: DROP
//! - Echo of our own broadcast: DROP
//! - NaN/Inf in any time, speed, volume or pose component: DROP + LOG
//! - Stamp not strictly newer than the newest held for that channel: DROP
//! - Clip, deck or slide index outside the local catalog: DROP + LOG
//! - Unknown enum value, wrong vector length, missing stamp: DROP + LOG

use lectern_core::{PeerId, SnapshotStamp};
use lectern_wire::{
    AudioStateProto, ClipSelectProto, ClipSourceKindProto, Envelope, EntityPoseProto,
    GrabEventProto, HandProto, MediaStateProto, ObjectStateProto, SlideStateProto,
    SnapshotStampProto,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Accepted,
    /// Dropped: envelope without a payload.
    DroppedEmpty,
    /// Dropped: sent by the local peer.
    DroppedOwnEcho,
    /// Dropped: NaN or Inf in a numeric field.
    DroppedNanInf,
    /// Dropped: not newer than what is already held.
    DroppedStale {
        stamp: SnapshotStamp,
        newest: SnapshotStamp,
    },
    /// Dropped: clip index outside the catalog.
    DroppedOutOfRange { index: usize, len: usize },
    /// Dropped: structurally invalid.
    DroppedMalformed(&'static str),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

macro_rules! check {
    ($result:expr) => {
        match $result {
            ValidationResult::Accepted => {}
            dropped => return dropped,
        }
    };
}

pub fn validate_envelope(envelope: &Envelope, local_peer: PeerId) -> ValidationResult {
    if envelope.payload.is_none() {
        return ValidationResult::DroppedEmpty;
    }
    if envelope.sender == local_peer {
        return ValidationResult::DroppedOwnEcho;
    }
    ValidationResult::Accepted
}

fn check_stamp(
    stamp: &Option<SnapshotStampProto>,
    newest: Option<SnapshotStamp>,
) -> ValidationResult {
    let Some(stamp) = stamp else {
        return ValidationResult::DroppedMalformed("missing snapshot stamp");
    };
    let stamp = SnapshotStamp::new(stamp.version, stamp.issuer);
    if !stamp.is_plausible_after(newest) {
        return ValidationResult::DroppedMalformed("stamp version too far ahead");
    }
    match newest {
        Some(newest) if stamp <= newest => ValidationResult::DroppedStale { stamp, newest },
        _ => ValidationResult::Accepted,
    }
}

fn check_reference(m: &MediaStateProto) -> ValidationResult {
    if !(m.base_media_time.is_finite()
        && m.base_wall_clock_time.is_finite()
        && m.playback_speed.is_finite())
    {
        return ValidationResult::DroppedNanInf;
    }
    if m.playback_speed <= 0.0 {
        return ValidationResult::DroppedMalformed("non-positive playback speed");
    }
    ValidationResult::Accepted
}

pub fn validate_media_state(
    m: &MediaStateProto,
    newest: Option<SnapshotStamp>,
) -> ValidationResult {
    check!(check_reference(m));
    check_stamp(&m.stamp, newest)
}

pub fn validate_clip_select(
    c: &ClipSelectProto,
    newest: Option<SnapshotStamp>,
    catalog_len: usize,
) -> ValidationResult {
    if ClipSourceKindProto::try_from(c.source_kind).is_err() {
        return ValidationResult::DroppedMalformed("unknown clip source kind");
    }
    let Some(snapshot) = &c.snapshot else {
        return ValidationResult::DroppedMalformed("missing reset snapshot");
    };
    check!(check_reference(snapshot));
    if c.volume.is_nan() {
        return ValidationResult::DroppedNanInf;
    }

    let index = c.selected_index as usize;
    if index >= catalog_len {
        return ValidationResult::DroppedOutOfRange {
            index,
            len: catalog_len,
        };
    }
    check_stamp(&c.stamp, newest)
}

pub fn validate_audio(a: &AudioStateProto, newest: Option<SnapshotStamp>) -> ValidationResult {
    if !a.volume.is_finite() {
        return ValidationResult::DroppedNanInf;
    }
    check_stamp(&a.stamp, newest)
}

pub fn validate_object_state(
    o: &ObjectStateProto,
    newest: Option<SnapshotStamp>,
    object_count: usize,
) -> ValidationResult {
    if o.active.len() != object_count {
        return ValidationResult::DroppedMalformed("object count mismatch");
    }
    check_stamp(&o.stamp, newest)
}

/// `slide_counts` holds the page count of each local deck.
pub fn validate_slide_state(
    s: &SlideStateProto,
    newest: Option<SnapshotStamp>,
    slide_counts: &[usize],
) -> ValidationResult {
    let deck = s.deck_index as usize;
    let Some(&count) = slide_counts.get(deck) else {
        return ValidationResult::DroppedOutOfRange {
            index: deck,
            len: slide_counts.len(),
        };
    };
    let slide = s.slide_index as usize;
    if slide >= count.max(1) {
        return ValidationResult::DroppedOutOfRange {
            index: slide,
            len: count,
        };
    }
    check_stamp(&s.stamp, newest)
}

pub fn validate_grab(g: &GrabEventProto) -> ValidationResult {
    if HandProto::try_from(g.hand).is_err() {
        return ValidationResult::DroppedMalformed("unknown hand");
    }
    if g.grabbed && !g.held {
        return ValidationResult::DroppedMalformed("grab event without held flag");
    }
    ValidationResult::Accepted
}

pub fn validate_pose(p: &EntityPoseProto) -> ValidationResult {
    if p.position.len() != 3 || p.rotation.len() != 4 || p.scale.len() != 3 {
        return ValidationResult::DroppedMalformed("pose vector length");
    }
    let finite = p
        .position
        .iter()
        .chain(&p.rotation)
        .chain(&p.scale)
        .all(|v| v.is_finite());
    if !finite {
        return ValidationResult::DroppedNanInf;
    }
    ValidationResult::Accepted
}

#[cfg(test)]
mod tests {
    use lectern_core::MediaReferenceSnapshot;
    use lectern_wire::envelope::Payload;

    use super::*;

    fn media(version: u64, issuer: PeerId) -> MediaStateProto {
        MediaReferenceSnapshot {
            stamp: SnapshotStamp::new(version, issuer),
            base_media_time: 4.0,
            base_wall_clock_time: 10.0,
            playing: true,
            playback_speed: 1.0,
        }
        .into()
    }

    #[test]
    fn test_envelope_checks() {
        let env = Envelope::new(3, Payload::MediaState(media(1, 3)));
        assert_eq!(validate_envelope(&env, 3), ValidationResult::DroppedOwnEcho);
        assert!(validate_envelope(&env, 5).is_accepted());
        assert_eq!(
            validate_envelope(&Envelope::default(), 5),
            ValidationResult::DroppedEmpty
        );
    }

    #[test]
    fn test_nan_rejection() {
        let mut m = media(1, 1);
        m.base_media_time = f64::NAN;
        assert_eq!(validate_media_state(&m, None), ValidationResult::DroppedNanInf);

        let mut m = media(1, 1);
        m.playback_speed = f64::INFINITY;
        assert_eq!(validate_media_state(&m, None), ValidationResult::DroppedNanInf);
    }

    #[test]
    fn test_stale_rejection() {
        let newest = Some(SnapshotStamp::new(5, 2));
        assert!(matches!(
            validate_media_state(&media(5, 2), newest),
            ValidationResult::DroppedStale { .. }
        ));
        assert!(matches!(
            validate_media_state(&media(4, 9), newest),
            ValidationResult::DroppedStale { .. }
        ));
        assert!(validate_media_state(&media(5, 3), newest).is_accepted());
        assert!(validate_media_state(&media(6, 1), newest).is_accepted());
    }

    #[test]
    fn test_runaway_stamp_rejection() {
        assert!(matches!(
            validate_media_state(&media(u64::MAX, 9), None),
            ValidationResult::DroppedMalformed(_)
        ));
        let newest = Some(SnapshotStamp::new(5, 2));
        assert!(matches!(
            validate_media_state(&media(5 + (1 << 21), 9), newest),
            ValidationResult::DroppedMalformed(_)
        ));
        assert!(validate_media_state(&media(500, 9), newest).is_accepted());
    }

    #[test]
    fn test_missing_stamp_rejection() {
        let mut m = media(1, 1);
        m.stamp = None;
        assert_eq!(
            validate_media_state(&m, None),
            ValidationResult::DroppedMalformed("missing snapshot stamp")
        );
    }

    #[test]
    fn test_clip_select_out_of_range() {
        let c = ClipSelectProto {
            stamp: Some(SnapshotStamp::new(2, 1).into()),
            selected_index: 4,
            source_kind: ClipSourceKindProto::LocalAsset as i32,
            clip_identifier: "frogs.mp4".into(),
            volume: 1.0,
            muted: false,
            snapshot: Some(media(2, 1)),
        };
        assert_eq!(
            validate_clip_select(&c, None, 3),
            ValidationResult::DroppedOutOfRange { index: 4, len: 3 }
        );
        assert!(validate_clip_select(&c, None, 5).is_accepted());
    }

    #[test]
    fn test_pose_checks() {
        let ok = EntityPoseProto {
            entity_id: 1,
            position: vec![0.0; 3],
            rotation: vec![0.0, 0.0, 0.0, 1.0],
            scale: vec![1.0; 3],
        };
        assert!(validate_pose(&ok).is_accepted());

        let nan = EntityPoseProto {
            scale: vec![1.0, f32::NAN, 1.0],
            ..ok.clone()
        };
        assert_eq!(validate_pose(&nan), ValidationResult::DroppedNanInf);

        let short = EntityPoseProto {
            rotation: vec![0.0; 3],
            ..ok
        };
        assert!(matches!(
            validate_pose(&short),
            ValidationResult::DroppedMalformed(_)
        ));
    }

    #[test]
    fn test_object_state_count() {
        let o = ObjectStateProto {
            stamp: Some(SnapshotStamp::new(1, 1).into()),
            active: vec![true, false],
            passthrough: false,
        };
        assert!(validate_object_state(&o, None, 2).is_accepted());
        assert!(!validate_object_state(&o, None, 3).is_accepted());
    }

    #[test]
    fn test_slide_state_bounds() {
        let counts = [3, 1];
        let s = |deck, slide| SlideStateProto::new(SnapshotStamp::new(2, 1), deck, slide);
        assert!(validate_slide_state(&s(0, 2), None, &counts).is_accepted());
        assert_eq!(
            validate_slide_state(&s(2, 0), None, &counts),
            ValidationResult::DroppedOutOfRange { index: 2, len: 2 }
        );
        assert_eq!(
            validate_slide_state(&s(1, 1), None, &counts),
            ValidationResult::DroppedOutOfRange { index: 1, len: 1 }
        );
        assert!(matches!(
            validate_slide_state(&s(0, 0), Some(SnapshotStamp::new(2, 1)), &counts),
            ValidationResult::DroppedStale { .. }
        ));
    }

    #[test]
    fn test_grab_checks() {
        let g = GrabEventProto {
            entity_id: 1,
            hand: 5,
            grabbed: true,
            held: true,
        };
        assert!(!validate_grab(&g).is_accepted());
        let g = GrabEventProto {
            hand: HandProto::Left as i32,
            ..g
        };
        assert!(validate_grab(&g).is_accepted());
    }
}
