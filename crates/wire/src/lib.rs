//! Lectern Wire Protocol Types
//!
//! This crate defines the Protobuf messages peers exchange over the relay's
//! broadcast primitive. Every peer build MUST depend on this crate so that
//! teacher and student builds agree on the schema.
//!
//! # Channels
//!
//! Each payload travels on its own [`Channel`]. The relay guarantees reliable,
//! ordered delivery per sender per channel and nothing across channels, so a
//! message never relies on another channel's message having arrived first
//! (a clip selection carries its reset snapshot inline for that reason).
//!
//! All messages are wrapped in an [`Envelope`] that names the sender.

#![deny(unsafe_code)]

use glam::{Quat, Vec3};
use lectern_core::{
    AudioState, ClipSource, ClipSourceKind, Hand, MediaReferenceSnapshot, MediaSelection, Pose,
    SnapshotStamp,
};
use prost::{Enumeration, Message, Oneof};

/// Peer id as carried on the wire.
pub type PeerId = u32;

/// Entity id as carried on the wire.
pub type EntityId = u64;

// ============================================================================
// Channels
// ============================================================================

/// Logical broadcast channel a payload is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Reference snapshots.
    MediaState,
    /// Volume and mute.
    Audio,
    /// Decorative transport animations.
    Cue,
    /// Clip selection changes.
    Selection,
    /// Ghost-hand grab and release.
    Grab,
    /// Teacher-issued permission changes.
    Permission,
    /// Teacher-issued session commands.
    Command,
    /// Shared object toggles and passthrough.
    ObjectState,
    /// Poses of movable entities.
    Pose,
    /// Active slide deck and page.
    Slides,
}

// ============================================================================
// Media Channel Messages
// ============================================================================

/// Ordering stamp for authority broadcasts.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotStampProto {
    #[prost(uint64, tag = "1")]
    pub version: u64,

    #[prost(uint32, tag = "2")]
    pub issuer: PeerId,
}

/// Authoritative playback reference.
#[derive(Clone, PartialEq, Message)]
pub struct MediaStateProto {
    #[prost(message, optional, tag = "1")]
    pub stamp: Option<SnapshotStampProto>,

    #[prost(double, tag = "2")]
    pub base_media_time: f64,

    #[prost(double, tag = "3")]
    pub base_wall_clock_time: f64,

    #[prost(bool, tag = "4")]
    pub playing: bool,

    #[prost(double, tag = "5")]
    pub playback_speed: f64,
}

/// Volume and mute, sent apart from the reference snapshot.
#[derive(Clone, PartialEq, Message)]
pub struct AudioStateProto {
    #[prost(message, optional, tag = "1")]
    pub stamp: Option<SnapshotStampProto>,

    #[prost(float, tag = "2")]
    pub volume: f32,

    #[prost(bool, tag = "3")]
    pub muted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ClipSourceKindProto {
    Url = 0,
    LocalAsset = 1,
}

/// New active clip. Peers re-prepare on receipt.
#[derive(Clone, PartialEq, Message)]
pub struct ClipSelectProto {
    #[prost(message, optional, tag = "1")]
    pub stamp: Option<SnapshotStampProto>,

    #[prost(uint32, tag = "2")]
    pub selected_index: u32,

    #[prost(enumeration = "ClipSourceKindProto", tag = "3")]
    pub source_kind: i32,

    #[prost(string, tag = "4")]
    pub clip_identifier: String,

    #[prost(float, tag = "5")]
    pub volume: f32,

    #[prost(bool, tag = "6")]
    pub muted: bool,

    /// Reset reference for the new clip (time 0, paused).
    #[prost(message, optional, tag = "7")]
    pub snapshot: Option<MediaStateProto>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum CueAction {
    Play = 0,
    Pause = 1,
    FastForward = 2,
    FastBackward = 3,
    MarkForward = 4,
    MarkBackward = 5,
}

/// Transport animation cue. Purely cosmetic on receivers.
#[derive(Clone, PartialEq, Message)]
pub struct AnimationCueProto {
    #[prost(enumeration = "CueAction", tag = "1")]
    pub action: i32,

    /// Signed seek distance in seconds, zero for play/pause.
    #[prost(double, tag = "2")]
    pub delta: f64,
}

// ============================================================================
// Interaction Channel Messages
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum HandProto {
    Left = 0,
    Right = 1,
}

/// A hand grabbed or released an entity.
#[derive(Clone, PartialEq, Message)]
pub struct GrabEventProto {
    #[prost(uint64, tag = "1")]
    pub entity_id: EntityId,

    #[prost(enumeration = "HandProto", tag = "2")]
    pub hand: i32,

    /// True for grab, false for release.
    #[prost(bool, tag = "3")]
    pub grabbed: bool,

    /// Held flag after the event.
    #[prost(bool, tag = "4")]
    pub held: bool,
}

/// Entity pose, written by the peer holding authority over it.
#[derive(Clone, PartialEq, Message)]
pub struct EntityPoseProto {
    #[prost(uint64, tag = "1")]
    pub entity_id: EntityId,

    /// [x, y, z]
    #[prost(float, repeated, tag = "2")]
    pub position: Vec<f32>,

    /// [x, y, z, w]
    #[prost(float, repeated, tag = "3")]
    pub rotation: Vec<f32>,

    /// [x, y, z]
    #[prost(float, repeated, tag = "4")]
    pub scale: Vec<f32>,
}

/// Active flags of the shared scene objects plus the passthrough toggle.
#[derive(Clone, PartialEq, Message)]
pub struct ObjectStateProto {
    #[prost(message, optional, tag = "1")]
    pub stamp: Option<SnapshotStampProto>,

    #[prost(bool, repeated, tag = "2")]
    pub active: Vec<bool>,

    #[prost(bool, tag = "3")]
    pub passthrough: bool,
}

/// Active slide deck and the page shown from it.
#[derive(Clone, PartialEq, Message)]
pub struct SlideStateProto {
    #[prost(message, optional, tag = "1")]
    pub stamp: Option<SnapshotStampProto>,

    #[prost(uint32, tag = "2")]
    pub deck_index: u32,

    #[prost(uint32, tag = "3")]
    pub slide_index: u32,
}

// ============================================================================
// Classroom Control Messages
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum PermissionKind {
    Grab = 0,
    Mic = 1,
    LockMovement = 2,
}

/// Permission change for the listed players.
#[derive(Clone, PartialEq, Message)]
pub struct PermissionProto {
    #[prost(enumeration = "PermissionKind", tag = "1")]
    pub kind: i32,

    #[prost(bool, tag = "2")]
    pub enabled: bool,

    #[prost(uint32, repeated, tag = "3")]
    pub target_ids: Vec<PeerId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum SessionCommandKind {
    ResetPlayer = 0,
    ResetAll = 1,
    Kick = 2,
    ExitSession = 3,
    ClearBoard = 4,
    HideMenu = 5,
}

/// Teacher-issued command. `target_ids` is empty for room-wide commands.
#[derive(Clone, PartialEq, Message)]
pub struct SessionCommandProto {
    #[prost(enumeration = "SessionCommandKind", tag = "1")]
    pub command: i32,

    #[prost(uint32, repeated, tag = "2")]
    pub target_ids: Vec<PeerId>,
}

// ============================================================================
// Envelope
// ============================================================================

/// Every broadcast payload, tagged with its sender.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(uint32, tag = "1")]
    pub sender: PeerId,

    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    use super::*;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        MediaState(MediaStateProto),
        #[prost(message, tag = "3")]
        Audio(AudioStateProto),
        #[prost(message, tag = "4")]
        Cue(AnimationCueProto),
        #[prost(message, tag = "5")]
        ClipSelect(ClipSelectProto),
        #[prost(message, tag = "6")]
        Grab(GrabEventProto),
        #[prost(message, tag = "7")]
        Permission(PermissionProto),
        #[prost(message, tag = "8")]
        Command(SessionCommandProto),
        #[prost(message, tag = "9")]
        ObjectState(ObjectStateProto),
        #[prost(message, tag = "10")]
        Pose(EntityPoseProto),
        #[prost(message, tag = "11")]
        Slides(SlideStateProto),
    }

    impl Payload {
        pub fn channel(&self) -> Channel {
            match self {
                Self::MediaState(_) => Channel::MediaState,
                Self::Audio(_) => Channel::Audio,
                Self::Cue(_) => Channel::Cue,
                Self::ClipSelect(_) => Channel::Selection,
                Self::Grab(_) => Channel::Grab,
                Self::Permission(_) => Channel::Permission,
                Self::Command(_) => Channel::Command,
                Self::ObjectState(_) => Channel::ObjectState,
                Self::Pose(_) => Channel::Pose,
                Self::Slides(_) => Channel::Slides,
            }
        }
    }
}

impl Envelope {
    pub fn new(sender: PeerId, payload: envelope::Payload) -> Self {
        Self {
            sender,
            payload: Some(payload),
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        self.payload.as_ref().map(envelope::Payload::channel)
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<SnapshotStamp> for SnapshotStampProto {
    fn from(s: SnapshotStamp) -> Self {
        Self {
            version: s.version,
            issuer: s.issuer,
        }
    }
}

impl From<SnapshotStampProto> for SnapshotStamp {
    fn from(s: SnapshotStampProto) -> Self {
        Self::new(s.version, s.issuer)
    }
}

fn require_stamp(stamp: Option<SnapshotStampProto>) -> Result<SnapshotStamp, &'static str> {
    stamp.map(Into::into).ok_or("missing snapshot stamp")
}

impl From<MediaReferenceSnapshot> for MediaStateProto {
    fn from(s: MediaReferenceSnapshot) -> Self {
        Self {
            stamp: Some(s.stamp.into()),
            base_media_time: s.base_media_time,
            base_wall_clock_time: s.base_wall_clock_time,
            playing: s.playing,
            playback_speed: s.playback_speed,
        }
    }
}

impl TryFrom<MediaStateProto> for MediaReferenceSnapshot {
    type Error = &'static str;

    fn try_from(m: MediaStateProto) -> Result<Self, Self::Error> {
        Ok(Self {
            stamp: require_stamp(m.stamp)?,
            base_media_time: m.base_media_time,
            base_wall_clock_time: m.base_wall_clock_time,
            playing: m.playing,
            playback_speed: m.playback_speed,
        })
    }
}

impl AudioStateProto {
    pub fn new(stamp: SnapshotStamp, audio: AudioState) -> Self {
        Self {
            stamp: Some(stamp.into()),
            volume: audio.volume,
            muted: audio.muted,
        }
    }
}

impl TryFrom<AudioStateProto> for (SnapshotStamp, AudioState) {
    type Error = &'static str;

    fn try_from(a: AudioStateProto) -> Result<Self, Self::Error> {
        Ok((require_stamp(a.stamp)?, AudioState::new(a.volume, a.muted)))
    }
}

impl From<ClipSourceKind> for ClipSourceKindProto {
    fn from(k: ClipSourceKind) -> Self {
        match k {
            ClipSourceKind::Url => Self::Url,
            ClipSourceKind::LocalAsset => Self::LocalAsset,
        }
    }
}

impl From<ClipSourceKindProto> for ClipSourceKind {
    fn from(k: ClipSourceKindProto) -> Self {
        match k {
            ClipSourceKindProto::Url => Self::Url,
            ClipSourceKindProto::LocalAsset => Self::LocalAsset,
        }
    }
}

impl ClipSelectProto {
    pub fn new(selection: &MediaSelection, snapshot: MediaReferenceSnapshot) -> Self {
        let kind: ClipSourceKindProto = selection.clip_source_kind().into();
        Self {
            stamp: Some(selection.stamp.into()),
            selected_index: u32::try_from(selection.selected_index).unwrap_or(u32::MAX),
            source_kind: kind as i32,
            clip_identifier: selection.clip_identifier().to_string(),
            volume: selection.audio.volume,
            muted: selection.audio.muted,
            snapshot: Some(snapshot.into()),
        }
    }
}

impl TryFrom<ClipSelectProto> for (MediaSelection, MediaReferenceSnapshot) {
    type Error = &'static str;

    fn try_from(c: ClipSelectProto) -> Result<Self, Self::Error> {
        let kind = ClipSourceKindProto::try_from(c.source_kind)
            .map_err(|_| "unknown clip source kind")?;
        let snapshot = c
            .snapshot
            .ok_or("missing reset snapshot")
            .and_then(MediaReferenceSnapshot::try_from)?;

        let mut selection = MediaSelection::new(
            require_stamp(c.stamp)?,
            c.selected_index as usize,
            ClipSource::from_parts(kind.into(), c.clip_identifier),
        );
        selection.audio = AudioState::new(c.volume, c.muted);
        Ok((selection, snapshot))
    }
}

impl SlideStateProto {
    pub fn new(stamp: SnapshotStamp, deck_index: usize, slide_index: usize) -> Self {
        Self {
            stamp: Some(stamp.into()),
            deck_index: u32::try_from(deck_index).unwrap_or(u32::MAX),
            slide_index: u32::try_from(slide_index).unwrap_or(u32::MAX),
        }
    }

    pub fn decoded_stamp(&self) -> Result<SnapshotStamp, &'static str> {
        require_stamp(self.stamp.clone())
    }
}

impl From<Hand> for HandProto {
    fn from(h: Hand) -> Self {
        match h {
            Hand::Left => Self::Left,
            Hand::Right => Self::Right,
        }
    }
}

impl From<HandProto> for Hand {
    fn from(h: HandProto) -> Self {
        match h {
            HandProto::Left => Self::Left,
            HandProto::Right => Self::Right,
        }
    }
}

impl GrabEventProto {
    /// Hand carried by the event, if it is a known value.
    pub fn decoded_hand(&self) -> Result<Hand, &'static str> {
        HandProto::try_from(self.hand)
            .map(Into::into)
            .map_err(|_| "unknown hand")
    }
}

impl EntityPoseProto {
    pub fn new(entity_id: EntityId, pose: &Pose) -> Self {
        Self {
            entity_id,
            position: pose.position.to_array().to_vec(),
            rotation: pose.rotation.to_array().to_vec(),
            scale: pose.scale.to_array().to_vec(),
        }
    }
}

impl TryFrom<&EntityPoseProto> for Pose {
    type Error = &'static str;

    fn try_from(p: &EntityPoseProto) -> Result<Self, Self::Error> {
        let [px, py, pz] = p.position[..] else {
            return Err("position must have exactly 3 elements");
        };
        let [rx, ry, rz, rw] = p.rotation[..] else {
            return Err("rotation must have exactly 4 elements");
        };
        let [sx, sy, sz] = p.scale[..] else {
            return Err("scale must have exactly 3 elements");
        };
        Ok(Self {
            position: Vec3::new(px, py, pz),
            rotation: Quat::from_xyzw(rx, ry, rz, rw),
            scale: Vec3::new(sx, sy, sz),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
