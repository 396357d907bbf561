//! Shared video timeline.
//!
//! The teacher (whoever holds authority over the media screen entity) drives
//! playback and publishes a [`MediaReferenceSnapshot`] on every change. Every
//! other peer extrapolates the expected playhead from the newest snapshot and
//! steers its own player toward it each tick, with a hard snap for large gaps
//! and a bounded rate bias for small ones.
//!
//! Clip changes force every peer through prepare, seek and settle; the
//! buffering indicator is up for the whole cycle.

use lectern_core::media::{clamp_media_time, end_time, is_at_end};
use lectern_core::{
    ActionKind, AudioState, Correction, DriftCorrector, EntityId, MarkDirection, MediaCatalog,
    MediaReferenceSnapshot, MediaSelection, PeerId, PreparePhase, PreparePoll, PrepareJob,
    SessionTime, SettlePoll, SnapshotStamp, checked_duration, nearest_mark,
};
use lectern_wire::envelope::Payload;
use lectern_wire::{
    AnimationCueProto, AudioStateProto, ClipSelectProto, CueAction, SessionCommandKind,
    SessionCommandProto,
};
use tracing::{debug, error, warn};

use crate::bus::{EventBus, SessionEvent};
use crate::collaborators::{BackendEvent, MediaBackend};
use crate::config::MediaSyncConfig;
use crate::error::{Result, SessionError};
use crate::outbox::Outbox;

/// Backend duration, ignoring values no clip can have.
fn clip_duration(backend: &dyn MediaBackend) -> Option<f64> {
    let raw = backend.duration()?;
    checked_duration(raw)
        .inspect_err(|err| debug!(%err, "backend reported an unusable duration"))
        .ok()
}

/// Authority-side playback operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaAction {
    Play,
    Pause,
    TogglePlay,
    Seek { target: f64, auto_play: bool },
    SetSpeed(f64),
    SetVolume(f32),
    SetMuted(bool),
    ToggleMute,
    SelectClip(usize),
    FastForward { step: f64 },
    FastBackward { step: f64 },
    JumpToMark(MarkDirection),
    /// The backend hit the end of the clip.
    EndReached,
}

impl ActionKind for MediaAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Play => "media.play",
            Self::Pause => "media.pause",
            Self::TogglePlay => "media.toggle_play",
            Self::Seek { .. } => "media.seek",
            Self::SetSpeed(_) => "media.set_speed",
            Self::SetVolume(_) => "media.set_volume",
            Self::SetMuted(_) => "media.set_muted",
            Self::ToggleMute => "media.toggle_mute",
            Self::SelectClip(_) => "media.select_clip",
            Self::FastForward { .. } => "media.fast_forward",
            Self::FastBackward { .. } => "media.fast_backward",
            Self::JumpToMark(_) => "media.jump_to_mark",
            Self::EndReached => "media.end_reached",
        }
    }
}

/// Collaborators a controller call may touch.
pub struct MediaIo<'a> {
    pub backend: &'a mut dyn MediaBackend,
    pub outbox: &'a mut Outbox,
    pub bus: &'a mut EventBus,
}

/// Newest stamp applied per channel. The channels are ordered independently
/// on the relay, so each keeps its own high-water mark.
#[derive(Debug, Clone, Copy, Default)]
struct Newest {
    media: Option<SnapshotStamp>,
    selection: Option<SnapshotStamp>,
    audio: Option<SnapshotStamp>,
}

pub struct MediaSyncController {
    entity: EntityId,
    local_peer: PeerId,
    catalog: MediaCatalog,
    config: MediaSyncConfig,

    selection: Option<MediaSelection>,
    snapshot: MediaReferenceSnapshot,
    audio: AudioState,
    newest: Newest,
    /// Highest stamp seen on any channel; the next broadcast goes one above.
    max_seen: SnapshotStamp,

    corrector: DriftCorrector,
    prepare: PrepareJob,
    buffering_published: bool,
    slider_lock: Option<f64>,
    menu_open: bool,
}

impl MediaSyncController {
    pub fn new(
        entity: EntityId,
        local_peer: PeerId,
        catalog: MediaCatalog,
        config: MediaSyncConfig,
    ) -> Self {
        Self {
            entity,
            local_peer,
            catalog,
            corrector: DriftCorrector::new(config.drift()),
            prepare: config.prepare_job(),
            config,
            selection: None,
            snapshot: MediaReferenceSnapshot::default(),
            audio: AudioState::default(),
            newest: Newest::default(),
            max_seen: SnapshotStamp::default(),
            buffering_published: false,
            slider_lock: None,
            menu_open: false,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn catalog(&self) -> &MediaCatalog {
        &self.catalog
    }

    pub fn selection(&self) -> Option<&MediaSelection> {
        self.selection.as_ref()
    }

    pub fn snapshot(&self) -> &MediaReferenceSnapshot {
        &self.snapshot
    }

    pub fn audio(&self) -> AudioState {
        self.audio
    }

    pub fn buffering(&self) -> bool {
        self.prepare.buffering()
    }

    pub fn slider_lock(&self) -> Option<f64> {
        self.slider_lock
    }

    pub fn menu_open(&self) -> bool {
        self.menu_open
    }

    pub fn config(&self) -> &MediaSyncConfig {
        &self.config
    }

    pub fn newest_media_stamp(&self) -> Option<SnapshotStamp> {
        self.newest.media
    }

    pub fn newest_selection_stamp(&self) -> Option<SnapshotStamp> {
        self.newest.selection
    }

    pub fn newest_audio_stamp(&self) -> Option<SnapshotStamp> {
        self.newest.audio
    }

    pub fn set_local_peer(&mut self, peer: PeerId) {
        self.local_peer = peer;
    }

    /// True when an authority spawning now should pick the first clip.
    pub fn needs_default_selection(&self) -> bool {
        self.selection.is_none() && !self.catalog.is_empty()
    }

    /// Mark the teacher's clip menu open. Returns true if playback should be
    /// paused for it.
    pub fn open_menu(&mut self) -> bool {
        self.menu_open = true;
        self.snapshot.playing
    }

    pub fn close_menu(&mut self) {
        self.menu_open = false;
    }

    // ========================================================================
    // Authority Side
    // ========================================================================

    /// Run an authority-side action. The caller must hold authority over the
    /// media entity.
    pub fn apply(&mut self, action: MediaAction, io: &mut MediaIo<'_>, now: SessionTime) -> Result<()> {
        debug!(entity = self.entity, kind = action.kind(), "media action");
        match action {
            MediaAction::SelectClip(index) => return self.select_clip(index, io, now),
            MediaAction::SetVolume(volume) => self.set_audio(
                AudioState::new(volume, self.audio.muted),
                io,
            ),
            MediaAction::SetMuted(muted) => self.set_audio(AudioState { muted, ..self.audio }, io),
            MediaAction::ToggleMute => self.set_audio(
                AudioState {
                    muted: !self.audio.muted,
                    ..self.audio
                },
                io,
            ),
            _ if self.selection.is_none() => {
                debug!(entity = self.entity, "no clip selected; playback action ignored");
            }
            MediaAction::Play => self.play(io, now),
            MediaAction::Pause => self.pause(io, now),
            MediaAction::TogglePlay => {
                if self.snapshot.playing {
                    self.pause(io, now);
                } else {
                    self.play(io, now);
                }
            }
            MediaAction::Seek { target, auto_play } => self.seek(target, auto_play, io, now),
            MediaAction::SetSpeed(speed) => self.set_speed(speed, io, now),
            MediaAction::FastForward { step } => self.skip(step.abs(), io, now),
            MediaAction::FastBackward { step } => self.skip(-step.abs(), io, now),
            MediaAction::JumpToMark(direction) => self.jump_to_mark(direction, io, now),
            MediaAction::EndReached => self.end_reached(io, now),
        }
        Ok(())
    }

    fn next_stamp(&mut self) -> SnapshotStamp {
        self.max_seen = self.max_seen.next(self.local_peer);
        self.max_seen
    }

    fn observe(&mut self, stamp: SnapshotStamp) {
        self.max_seen = self.max_seen.max(stamp);
    }

    fn preparing(&self) -> bool {
        matches!(self.prepare.phase(), PreparePhase::Preparing { .. })
    }

    /// Authority's playhead. While the clip is still loading the backend has
    /// no meaningful time, so the reference is extrapolated instead.
    fn current_time(&self, backend: &dyn MediaBackend, now: SessionTime) -> f64 {
        let duration = clip_duration(backend);
        if self.preparing() {
            self.snapshot.expected_time(now, duration)
        } else {
            clamp_media_time(backend.time(), duration)
        }
    }

    fn publish_reference(
        &mut self,
        time: f64,
        playing: bool,
        speed: f64,
        io: &mut MediaIo<'_>,
        now: SessionTime,
    ) {
        let stamp = self.next_stamp();
        self.snapshot = MediaReferenceSnapshot {
            stamp,
            base_media_time: time,
            base_wall_clock_time: now,
            playing,
            playback_speed: speed,
        };
        self.newest.media = Some(stamp);
        io.outbox.push(Payload::MediaState(self.snapshot.into()));
        io.bus.publish(SessionEvent::PlaybackChanged { playing, time });
    }

    fn cue(&self, action: CueAction, delta: f64, io: &mut MediaIo<'_>) {
        io.outbox.push(Payload::Cue(AnimationCueProto {
            action: action as i32,
            delta,
        }));
        io.bus.publish(SessionEvent::Cue { action, delta });
    }

    fn play(&mut self, io: &mut MediaIo<'_>, now: SessionTime) {
        let mut time = self.current_time(io.backend, now);
        if let Some(duration) = clip_duration(io.backend)
            && is_at_end(time, duration)
        {
            time = 0.0;
            io.backend.seek(0.0);
        }
        io.backend.play();
        self.publish_reference(time, true, self.snapshot.playback_speed, io, now);
        self.cue(CueAction::Play, 0.0, io);
    }

    fn pause(&mut self, io: &mut MediaIo<'_>, now: SessionTime) {
        let time = self.current_time(io.backend, now);
        io.backend.pause();
        self.publish_reference(time, false, self.snapshot.playback_speed, io, now);
        self.cue(CueAction::Pause, 0.0, io);
    }

    fn seek(&mut self, target: f64, auto_play: bool, io: &mut MediaIo<'_>, now: SessionTime) {
        if !target.is_finite() {
            warn!(target, "seek target not finite; ignored");
            return;
        }

        let duration = clip_duration(io.backend);
        let (time, playing) = match duration {
            Some(d) if d > 0.0 && is_at_end(target, d) => (end_time(d), false),
            _ => (clamp_media_time(target, duration), auto_play),
        };

        io.backend.seek(time);
        if playing {
            io.backend.play();
        } else {
            io.backend.pause();
        }
        self.publish_reference(time, playing, self.snapshot.playback_speed, io, now);

        if !self.preparing() {
            self.prepare.begin_settle(time, now);
        }
        self.slider_lock = Some(time);
        io.bus.publish(SessionEvent::SliderLock(Some(time)));
        self.sync_buffering(io.bus);
    }

    fn skip(&mut self, delta: f64, io: &mut MediaIo<'_>, now: SessionTime) {
        let current = self.current_time(io.backend, now);
        self.seek(current + delta, self.snapshot.playing, io, now);

        let applied = self.snapshot.base_media_time - current;
        let action = if delta >= 0.0 {
            CueAction::FastForward
        } else {
            CueAction::FastBackward
        };
        self.cue(action, applied, io);
    }

    fn jump_to_mark(&mut self, direction: MarkDirection, io: &mut MediaIo<'_>, now: SessionTime) {
        let current = self.current_time(io.backend, now);
        let marks = self
            .selection
            .as_ref()
            .and_then(|s| self.catalog.get(s.selected_index))
            .map(|entry| entry.bookmarks().to_vec())
            .unwrap_or_default();

        match nearest_mark(&marks, current, direction, self.config.mark_guard_secs) {
            Some(jump) => {
                self.seek(jump.target, false, io, now);
                let action = match direction {
                    MarkDirection::Forward => CueAction::MarkForward,
                    MarkDirection::Backward => CueAction::MarkBackward,
                };
                self.cue(action, jump.delta, io);
            }
            None if self.snapshot.playing => self.pause(io, now),
            None => {}
        }
    }

    fn set_speed(&mut self, speed: f64, io: &mut MediaIo<'_>, now: SessionTime) {
        if !(speed.is_finite() && speed > 0.0) {
            warn!(speed, "playback speed must be positive; ignored");
            return;
        }
        let time = self.current_time(io.backend, now);
        io.backend.set_playback_speed(speed);
        self.publish_reference(time, self.snapshot.playing, speed, io, now);
    }

    fn set_audio(&mut self, audio: AudioState, io: &mut MediaIo<'_>) {
        let audio = AudioState::new(audio.volume, audio.muted);
        self.audio = audio;
        if let Some(selection) = self.selection.as_mut() {
            selection.audio = audio;
        }
        io.backend.set_volume(audio.volume);
        io.backend.set_muted(audio.muted);

        let stamp = self.next_stamp();
        self.newest.audio = Some(stamp);
        io.outbox.push(Payload::Audio(AudioStateProto::new(stamp, audio)));
        io.bus.publish(SessionEvent::AudioChanged(audio));
    }

    fn select_clip(&mut self, index: usize, io: &mut MediaIo<'_>, now: SessionTime) -> Result<()> {
        let Some(entry) = self.catalog.get(index) else {
            let len = self.catalog.len();
            warn!(index, len, "clip selection out of range; ignored");
            return Err(SessionError::OutOfRangeSelection { index, len });
        };

        let source = entry.source.clone();
        let stamp = self.next_stamp();
        let mut selection = MediaSelection::new(stamp, index, source);
        selection.audio = self.audio;
        let reset = MediaReferenceSnapshot::reset(stamp, now);

        io.outbox
            .push(Payload::ClipSelect(ClipSelectProto::new(&selection, reset)));
        io.outbox.push(Payload::Command(SessionCommandProto {
            command: SessionCommandKind::HideMenu as i32,
            target_ids: Vec::new(),
        }));
        self.menu_open = false;

        self.newest.selection = Some(stamp);
        self.newest.media = Some(stamp);
        self.load_selection(selection, reset, io, now);
        Ok(())
    }

    /// Re-send the current selection, reference and audio for a late joiner.
    /// Peers that already hold them drop the copies as stale.
    pub fn resend_state(&self, outbox: &mut Outbox) {
        let Some(selection) = self.selection.as_ref() else {
            return;
        };
        outbox.push(Payload::ClipSelect(ClipSelectProto::new(
            selection,
            self.snapshot,
        )));
        if let Some(stamp) = self.newest.audio {
            outbox.push(Payload::Audio(AudioStateProto::new(stamp, self.audio)));
        }
    }

    fn end_reached(&mut self, io: &mut MediaIo<'_>, now: SessionTime) {
        let Some(duration) = clip_duration(io.backend) else {
            return;
        };
        let time = end_time(duration);
        io.backend.pause();
        io.backend.seek(time);
        self.publish_reference(time, false, self.snapshot.playback_speed, io, now);
    }

    // ========================================================================
    // Receiver Side
    // ========================================================================

    /// Adopt a newer reference snapshot from the authority.
    pub fn on_media_state(&mut self, snapshot: MediaReferenceSnapshot, io: &mut MediaIo<'_>) {
        self.observe(snapshot.stamp);
        self.newest.media = Some(snapshot.stamp);
        self.snapshot = snapshot;
        io.bus.publish(SessionEvent::PlaybackChanged {
            playing: snapshot.playing,
            time: snapshot.base_media_time,
        });
    }

    /// Adopt a newer clip selection and start preparing it.
    ///
    /// The embedded reset snapshot only applies when nothing newer arrived
    /// on the media channel first.
    pub fn on_clip_select(
        &mut self,
        selection: MediaSelection,
        reset: MediaReferenceSnapshot,
        io: &mut MediaIo<'_>,
        now: SessionTime,
    ) {
        self.observe(selection.stamp);
        self.observe(reset.stamp);
        self.newest.selection = Some(selection.stamp);

        let snapshot = match self.newest.media {
            Some(newest) if reset.stamp <= newest => self.snapshot,
            _ => {
                self.newest.media = Some(reset.stamp);
                reset
            }
        };

        self.audio = selection.audio;
        self.load_selection(selection, snapshot, io, now);
    }

    pub fn on_audio(&mut self, stamp: SnapshotStamp, audio: AudioState, io: &mut MediaIo<'_>) {
        self.observe(stamp);
        self.newest.audio = Some(stamp);
        self.audio = audio;
        if let Some(selection) = self.selection.as_mut() {
            selection.audio = audio;
        }
        io.backend.set_volume(audio.volume);
        io.backend.set_muted(audio.muted);
        io.bus.publish(SessionEvent::AudioChanged(audio));
    }

    fn load_selection(
        &mut self,
        selection: MediaSelection,
        snapshot: MediaReferenceSnapshot,
        io: &mut MediaIo<'_>,
        now: SessionTime,
    ) {
        let index = selection.selected_index;
        io.backend.stop();
        io.backend.clear();
        io.backend.set_source(&selection.source);
        io.backend.prepare();

        self.selection = Some(selection);
        self.snapshot = snapshot;
        self.prepare.start(now);
        self.corrector.reset();
        self.slider_lock = None;

        io.bus.publish(SessionEvent::SelectionChanged { index });
        self.sync_buffering(io.bus);
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance prepare/settle, handle backend events and, on non-authority
    /// peers, steer the local player toward the reference.
    pub fn tick(&mut self, io: &mut MediaIo<'_>, now: SessionTime, authoritative: bool) {
        for event in io.backend.poll_events() {
            match event {
                BackendEvent::Prepared => debug!(entity = self.entity, "backend prepared"),
                BackendEvent::EndReached if authoritative => self.end_reached(io, now),
                BackendEvent::EndReached => io.backend.pause(),
                BackendEvent::Error(message) => {
                    error!(entity = self.entity, %message, "media backend error");
                    if self.preparing() {
                        self.prepare.cancel();
                    }
                }
            }
        }

        match self.prepare.poll_prepare(io.backend.is_prepared(), now) {
            PreparePoll::Ready => self.apply_prepared(io, now),
            PreparePoll::TimedOut => {
                warn!(entity = self.entity, "clip prepare timed out; keeping prior state");
            }
            PreparePoll::Idle | PreparePoll::Waiting => {}
        }

        match self.prepare.poll_settle(io.backend.time(), now) {
            SettlePoll::TimedOut => debug!(entity = self.entity, "seek settle timed out"),
            SettlePoll::Settled | SettlePoll::Idle | SettlePoll::Waiting => {}
        }

        if !authoritative && !self.preparing() && self.selection.is_some() {
            self.reconcile(io, now);
        }

        if let Some(pending) = self.slider_lock
            && (io.backend.time() - pending).abs() <= self.prepare.settle_tolerance()
        {
            self.slider_lock = None;
            io.bus.publish(SessionEvent::SliderLock(None));
        }

        self.sync_buffering(io.bus);
    }

    fn apply_prepared(&mut self, io: &mut MediaIo<'_>, now: SessionTime) {
        let target = self.snapshot.expected_time(now, clip_duration(io.backend));
        debug!(entity = self.entity, target, "clip prepared; seeking to reference");

        io.backend.seek(target);
        io.backend.set_playback_speed(self.snapshot.playback_speed);
        io.backend.set_volume(self.audio.volume);
        io.backend.set_muted(self.audio.muted);
        if self.snapshot.playing {
            io.backend.play();
        } else {
            io.backend.pause();
        }
        self.prepare.begin_settle(target, now);
    }

    fn reconcile(&mut self, io: &mut MediaIo<'_>, now: SessionTime) {
        let duration = clip_duration(io.backend);
        let expected = self.snapshot.expected_time(now, duration);
        let local = io.backend.time();
        let at_end = |t: f64| duration.is_some_and(|d| is_at_end(t, d));

        if self.snapshot.playing && !io.backend.is_playing() && !at_end(local) {
            io.backend.play();
        } else if !self.snapshot.playing && io.backend.is_playing() {
            io.backend.pause();
        }

        let correction = self.corrector.correct(
            expected,
            local,
            self.snapshot.playing,
            self.snapshot.playback_speed,
            now,
        );
        match correction {
            Correction::HardSnap { to } => io.backend.seek(to),
            Correction::RateBias { speed, .. } | Correction::BaseRate { speed } => {
                if io.backend.playback_speed() != speed {
                    io.backend.set_playback_speed(speed);
                }
            }
        }

        if at_end(io.backend.time()) && io.backend.is_playing() {
            io.backend.pause();
        }
    }

    fn sync_buffering(&mut self, bus: &mut EventBus) {
        let buffering = self.prepare.buffering();
        if buffering != self.buffering_published {
            self.buffering_published = buffering;
            bus.publish(SessionEvent::BufferingChanged(buffering));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
