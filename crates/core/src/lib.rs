//! Lectern Protocol Core
//!
//! This crate contains the pure state machines behind Lectern's shared
//! classroom state: who may drive a networked entity, and where the shared
//! media timeline is supposed to be right now.
//!
//! # Architecture Constraints
//!
//! The Protocol Core MUST NOT:
//! - Perform I/O operations (file, network, media decoding)
//! - Read wall-clock time
//! - Spawn threads or block
//!
//! Every operation that depends on time takes an explicit [`SessionTime`]
//! argument. Collaborators (the relay's authority primitive, the media
//! backend) are reached only through traits or plain values handed in by the
//! Session Edge (`lectern-session`).
//!
//! # Modules
//!
//! - [`ownership`]: ownership tokens and the authority arbiter
//! - [`media`]: reference snapshots, selections and the clip catalog
//! - [`drift`]: hard-snap / soft-rate drift correction
//! - [`bookmark`]: bookmark jump targets
//! - [`prepare`]: clip prepare and seek-settle job
//! - [`grab`]: multi-hand holder state
//! - [`transform`]: parent/child poses and recentring

#![deny(unsafe_code)]

pub mod bookmark;
pub mod drift;
pub mod grab;
pub mod media;
pub mod ownership;
pub mod prepare;
pub mod transform;

use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Relay-assigned peer identifier.
///
/// Peer ids are opaque ordering keys; nothing here assumes they are
/// contiguous or start at a particular value.
pub type PeerId = u32;

/// Stable identifier of a networked entity (tool, canvas, media screen).
pub type EntityId = u64;

/// Reading of the shared session clock, in seconds.
///
/// Monotonic per peer and roughly aligned across peers by the transport.
pub type SessionTime = f64;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the protocol core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The entity was never spawned with the arbiter (or was despawned).
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// A clip duration that is negative or not finite.
    #[error("invalid clip duration {0}")]
    InvalidDuration(f64),
}

/// Result alias for protocol core operations.
pub type Result<T> = std::result::Result<T, Error>;

pub use bookmark::{MarkDirection, MarkJump, nearest_mark};
pub use drift::{Correction, DriftConfig, DriftCorrector};
pub use grab::{GrabHolderState, Hand};
pub use media::{
    AudioState, ClipEntry, ClipSource, ClipSourceKind, END_EPSILON, MAX_STAMP_LEAD, MAX_STAMP_VERSION,
    MediaCatalog, MediaReferenceSnapshot, MediaSelection, SnapshotStamp, checked_duration,
};
pub use ownership::{
    ActionKind, AuthorityOutcome, AuthorityPrimitive, AuthorityState, Dispatch, OwnershipArbiter,
    OwnershipToken, RequestOutcome,
};
pub use prepare::{PrepareJob, PreparePhase, PreparePoll, SettlePoll};
pub use transform::{MoveDrag, ParentedPose, Pose, ResizeDrag, RoomBounds};
