//! In-memory relay and fake media backend for scenario tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use lectern_core::{AuthorityPrimitive, ClipSource, EntityId, PeerId};
use lectern_wire::Channel;

use crate::collaborators::{BackendEvent, Broadcaster, MediaBackend};

// ============================================================================
// Relay
// ============================================================================

#[derive(Default)]
struct RelayState {
    owners: BTreeMap<EntityId, PeerId>,
    /// Transfer requests in arrival order.
    requests: VecDeque<(PeerId, EntityId)>,
    /// Entities whose authority never moves.
    locked: BTreeSet<EntityId>,
    inboxes: BTreeMap<PeerId, VecDeque<Vec<u8>>>,
    /// Every broadcast, in send order.
    log: Vec<(PeerId, Channel)>,
    /// Requests the relay handed on, including duplicates.
    request_count: usize,
}

/// A room shared by every [`PeerLink`] it hands out.
///
/// Authority transfers happen only in [`Relay::grant_pending`], so tests
/// choose exactly when a handoff lands.
#[derive(Clone, Default)]
pub struct Relay {
    state: Rc<RefCell<RelayState>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, peer: PeerId) -> PeerLink {
        self.state.borrow_mut().inboxes.entry(peer).or_default();
        PeerLink {
            peer,
            relay: self.clone(),
        }
    }

    pub fn set_owner(&self, entity: EntityId, peer: PeerId) {
        self.state.borrow_mut().owners.insert(entity, peer);
    }

    pub fn owner(&self, entity: EntityId) -> Option<PeerId> {
        self.state.borrow().owners.get(&entity).copied()
    }

    /// Reject every future transfer of `entity`.
    pub fn lock(&self, entity: EntityId) {
        self.state.borrow_mut().locked.insert(entity);
    }

    /// Apply queued transfer requests in arrival order.
    pub fn grant_pending(&self) {
        let mut state = self.state.borrow_mut();
        while let Some((peer, entity)) = state.requests.pop_front() {
            if !state.locked.contains(&entity) {
                state.owners.insert(entity, peer);
            }
        }
    }

    pub fn request_count(&self) -> usize {
        self.state.borrow().request_count
    }

    /// Messages waiting for `peer`, oldest first.
    pub fn take_inbox(&self, peer: PeerId) -> Vec<Vec<u8>> {
        self.state
            .borrow_mut()
            .inboxes
            .get_mut(&peer)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<(PeerId, Channel)> {
        self.state.borrow().log.clone()
    }
}

/// One peer's view of the [`Relay`].
pub struct PeerLink {
    peer: PeerId,
    relay: Relay,
}

impl AuthorityPrimitive for PeerLink {
    fn has_authority(&self, entity: EntityId) -> bool {
        self.relay.owner(entity) == Some(self.peer)
    }

    fn request_authority(&mut self, entity: EntityId) {
        let mut state = self.relay.state.borrow_mut();
        state.request_count += 1;
        state.requests.push_back((self.peer, entity));
    }

    fn owner_of(&self, entity: EntityId) -> Option<PeerId> {
        self.relay.owner(entity)
    }
}

impl Broadcaster for PeerLink {
    fn broadcast(&mut self, channel: Channel, payload: Vec<u8>, exclude_sender: bool) {
        let mut state = self.relay.state.borrow_mut();
        state.log.push((self.peer, channel));
        for (peer, inbox) in state.inboxes.iter_mut() {
            if exclude_sender && *peer == self.peer {
                continue;
            }
            inbox.push_back(payload.clone());
        }
    }
}

// ============================================================================
// Media Backend
// ============================================================================

/// Scripted video player. Prepares only when told to and plays back in
/// step with [`FakeBackend::advance`].
#[derive(Debug, Clone)]
pub struct FakeBackend {
    pub clip_len: f64,
    pub source: Option<ClipSource>,
    pub prepare_requested: bool,
    pub prepared: bool,
    pub playing: bool,
    pub time: f64,
    pub speed: f64,
    pub volume: f32,
    pub muted: bool,
    /// Hold seeks until [`FakeBackend::land_seek`].
    pub seek_lag: bool,
    pub pending_seek: Option<f64>,
    pub events: Vec<BackendEvent>,
}

impl FakeBackend {
    pub fn new(clip_len: f64) -> Self {
        Self {
            clip_len,
            source: None,
            prepare_requested: false,
            prepared: false,
            playing: false,
            time: 0.0,
            speed: 1.0,
            volume: 1.0,
            muted: false,
            seek_lag: false,
            pending_seek: None,
            events: Vec::new(),
        }
    }

    /// Finish an outstanding prepare request.
    pub fn finish_prepare(&mut self) {
        if self.prepare_requested && self.source.is_some() {
            self.prepare_requested = false;
            self.prepared = true;
            self.events.push(BackendEvent::Prepared);
        }
    }

    pub fn land_seek(&mut self) {
        if let Some(time) = self.pending_seek.take() {
            self.time = time;
        }
    }

    /// Play forward by `dt` seconds of session time.
    pub fn advance(&mut self, dt: f64) {
        if !self.playing || !self.prepared {
            return;
        }
        self.time += dt * self.speed;
        if self.time >= self.clip_len {
            self.time = self.clip_len;
            self.playing = false;
            self.events.push(BackendEvent::EndReached);
        }
    }
}

impl MediaBackend for FakeBackend {
    fn set_source(&mut self, source: &ClipSource) {
        self.source = Some(source.clone());
        self.prepared = false;
    }

    fn clear(&mut self) {
        self.source = None;
        self.prepared = false;
        self.prepare_requested = false;
        self.time = 0.0;
        self.pending_seek = None;
    }

    fn prepare(&mut self) {
        self.prepare_requested = true;
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn play(&mut self) {
        self.playing = self.prepared;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.time = 0.0;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn seek(&mut self, time: f64) {
        if self.seek_lag {
            self.pending_seek = Some(time);
        } else {
            self.time = time;
        }
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn duration(&self) -> Option<f64> {
        self.prepared.then_some(self.clip_len)
    }

    fn playback_speed(&self) -> f64 {
        self.speed
    }

    fn set_playback_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.events)
    }
}
