//! Contracts for the external collaborators: the relay's broadcast primitive,
//! the media backend and the session lifecycle surface.
//!
//! The relay's authority primitive is [`lectern_core::AuthorityPrimitive`].

use lectern_core::{ClipSource, PeerId};
use lectern_wire::Channel;

use crate::roster::PlayerMode;

/// The relay's RPC/broadcast primitive.
///
/// Delivery is reliable and ordered per sender per channel.
pub trait Broadcaster {
    /// Send `payload` to every peer in the room, optionally skipping the
    /// local peer.
    fn broadcast(&mut self, channel: Channel, payload: Vec<u8>, exclude_sender: bool);
}

/// Notification raised by a media backend, drained once per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Prepared,
    EndReached,
    Error(String),
}

/// A platform video player.
///
/// Commands take effect asynchronously; `time()` and `is_prepared()` report
/// the player's current state.
pub trait MediaBackend {
    fn set_source(&mut self, source: &ClipSource);
    /// Drop the loaded clip, if any.
    fn clear(&mut self);
    fn prepare(&mut self);
    fn is_prepared(&self) -> bool;

    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;

    fn seek(&mut self, time: f64);
    fn time(&self) -> f64;
    /// Clip length, `None` until prepared.
    fn duration(&self) -> Option<f64>;

    fn playback_speed(&self) -> f64;
    fn set_playback_speed(&mut self, speed: f64);

    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool);

    fn poll_events(&mut self) -> Vec<BackendEvent>;
}

/// Scene/session lifecycle callbacks delivered by the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connected { local_peer: PeerId },
    Disconnected,
    PlayerJoined {
        peer: PeerId,
        display_name: String,
        mode: PlayerMode,
    },
    PlayerLeft { peer: PeerId },
    /// The relay closed the session.
    Shutdown { reason: String },
    SceneLoadComplete,
    /// Round-trip time measured by the relay.
    Ping { peer: PeerId, rtt_ms: u32 },
}
