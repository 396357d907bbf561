//! Lectern Session Edge
//!
//! The session edge binds the protocol logic in `lectern-core` to the relay
//! and the platform video player. It owns:
//! - The roster and teacher-issued permissions and commands
//! - Inbound validation and dispatch
//! - The media sync controller
//! - Grabbable tools and pens, canvas boards and shared object toggles
//! - The shared slide deck
//! - Authority acquisition for every interactive entity
//!
//! # Driving a session
//!
//! A [`SessionContext`] is built once per room with [`SessionBuilder`]. The
//! host feeds it relay messages through [`SessionContext::receive`], relay
//! callbacks through [`SessionContext::on_lifecycle`], and calls
//! [`SessionContext::tick`] once per frame with the session clock. Local
//! user input goes through the action methods; anything that needs
//! authority the local peer lacks waits for it inside the arbiter and runs
//! on a later tick, or is dropped when the handoff budget runs out.

#![deny(unsafe_code)]

pub mod bus;
pub mod canvas;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod media_sync;
pub mod objects;
pub mod outbox;
pub mod permissions;
pub mod roster;
pub mod slides;
pub mod tools;
pub mod validation;

#[cfg(test)]
mod testing;

use lectern_core::{
    ActionKind, AuthorityOutcome, AuthorityPrimitive, Dispatch, EntityId, Hand, MediaCatalog,
    MediaReferenceSnapshot, MediaSelection, MarkDirection, OwnershipArbiter, ParentedPose, PeerId,
    Pose, SessionTime, SnapshotStamp,
};
use lectern_wire::envelope::Payload;
use lectern_wire::{
    AnimationCueProto, AudioStateProto, ClipSelectProto, CueAction, EntityPoseProto, Envelope,
    GrabEventProto, MediaStateProto, ObjectStateProto, PermissionKind, PermissionProto,
    SessionCommandKind, SessionCommandProto, SlideStateProto,
};
use prost::Message;
use tracing::{debug, info, warn};

use bus::{EventBus, SessionEvent, SubscriberId, Topic};
use canvas::{CanvasAction, CanvasBoards};
use collaborators::{Broadcaster, LifecycleEvent, MediaBackend};
use config::SessionConfig;
use error::{Result, SessionError};
use media_sync::{MediaAction, MediaIo, MediaSyncController};
use objects::{ObjectsAction, SharedObjects};
use outbox::Outbox;
use permissions::{Command, LocalPlayer, Permission, Target, command_message, permission_message};
use roster::{PlayerMode, PlayerRecord, RoomStatus, Roster, ShutdownNotice, shutdown_notice};
use slides::{SlideAction, SlideController, SlideDeck};
use tools::{Tool, ToolAction, ToolRack};
use validation::{
    ValidationResult, validate_audio, validate_clip_select, validate_envelope, validate_grab,
    validate_media_state, validate_object_state, validate_pose, validate_slide_state,
};

// ============================================================================
// Actions
// ============================================================================

/// Anything the local peer may park behind an authority wait.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Media(MediaAction),
    Tool(ToolAction),
    Canvas(CanvasAction),
    Objects(ObjectsAction),
    Slides(SlideAction),
}

impl ActionKind for SessionAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Media(a) => a.kind(),
            Self::Tool(a) => a.kind(),
            Self::Canvas(a) => a.kind(),
            Self::Objects(a) => a.kind(),
            Self::Slides(a) => a.kind(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Wires a [`SessionContext`] from its collaborators.
///
/// [`build`](Self::build) fails with [`SessionError::MissingDependency`]
/// when the relay primitives, the media backend or the media screen were
/// never supplied.
pub struct SessionBuilder<A, B, M> {
    config: SessionConfig,
    local_peer: PeerId,
    mode: PlayerMode,
    display_name: String,
    media: Option<(EntityId, MediaCatalog)>,
    tools: Vec<(EntityId, Pose)>,
    pens: Vec<(EntityId, EntityId, Pose)>,
    canvases: Vec<(EntityId, ParentedPose)>,
    objects: Option<(EntityId, usize)>,
    slides: Option<(EntityId, Vec<SlideDeck>)>,
    authority: Option<A>,
    broadcaster: Option<B>,
    backend: Option<M>,
}

impl<A, B, M> SessionBuilder<A, B, M>
where
    A: AuthorityPrimitive,
    B: Broadcaster,
    M: MediaBackend,
{
    pub fn new(config: SessionConfig, local_peer: PeerId, mode: PlayerMode) -> Self {
        Self {
            config,
            local_peer,
            mode,
            display_name: String::new(),
            media: None,
            tools: Vec::new(),
            pens: Vec::new(),
            canvases: Vec::new(),
            objects: None,
            slides: None,
            authority: None,
            broadcaster: None,
            backend: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// The shared video screen and its clip catalog.
    pub fn media(mut self, entity: EntityId, catalog: MediaCatalog) -> Self {
        self.media = Some((entity, catalog));
        self
    }

    pub fn tool(mut self, entity: EntityId, spawn_pose: Pose) -> Self {
        self.tools.push((entity, spawn_pose));
        self
    }

    /// A pen that rests on `target` whenever nobody holds it.
    pub fn pen(mut self, entity: EntityId, target: EntityId, spawn_pose: Pose) -> Self {
        self.pens.push((entity, target, spawn_pose));
        self
    }

    pub fn canvas(mut self, entity: EntityId, pose: ParentedPose) -> Self {
        self.canvases.push((entity, pose));
        self
    }

    /// Replicated object toggles, written under authority over `entity`.
    pub fn shared_objects(mut self, entity: EntityId, count: usize) -> Self {
        self.objects = Some((entity, count));
        self
    }

    /// Slide decks shown on `entity`, written under authority over it.
    pub fn slides(mut self, entity: EntityId, decks: Vec<SlideDeck>) -> Self {
        self.slides = Some((entity, decks));
        self
    }

    pub fn authority(mut self, authority: A) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn broadcaster(mut self, broadcaster: B) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn backend(mut self, backend: M) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<SessionContext<A, B, M>> {
        self.config.validate()?;

        let authority = self
            .authority
            .ok_or(SessionError::MissingDependency("authority primitive"))?;
        let broadcaster = self
            .broadcaster
            .ok_or(SessionError::MissingDependency("broadcaster"))?;
        let backend = self
            .backend
            .ok_or(SessionError::MissingDependency("media backend"))?;
        let (media_entity, catalog) = self
            .media
            .ok_or(SessionError::MissingDependency("media screen"))?;

        let mut tools = ToolRack::new();
        for (entity, pose) in self.tools {
            tools.add(entity, pose);
        }
        for (entity, target, pose) in self.pens {
            tools.add_pen(entity, target, pose);
        }
        let mut canvases = CanvasBoards::new(self.config.canvas.clone());
        for (entity, pose) in self.canvases {
            canvases.add(entity, pose);
        }
        let objects = self
            .objects
            .map(|(entity, count)| SharedObjects::new(entity, self.local_peer, count));
        let slides = self
            .slides
            .map(|(entity, decks)| SlideController::new(entity, self.local_peer, decks));

        let media = MediaSyncController::new(
            media_entity,
            self.local_peer,
            catalog,
            self.config.media.clone(),
        );

        let mut ctx = SessionContext {
            arbiter: OwnershipArbiter::new(self.local_peer, self.config.authority.timeout_secs),
            local: LocalPlayer::new(self.local_peer, self.mode),
            display_name: self.display_name,
            status: RoomStatus::None,
            reconnect_pending: false,
            roster: Roster::new(),
            media,
            tools,
            canvases,
            objects,
            slides,
            bus: EventBus::with_queue_limit(self.config.events.queue_limit),
            outbox: Outbox::new(self.local_peer),
            authority,
            broadcaster,
            backend,
            config: self.config,
        };
        ctx.register_entities();
        Ok(ctx)
    }
}

// ============================================================================
// Session Context
// ============================================================================

/// Everything one peer knows about the room.
pub struct SessionContext<A, B, M> {
    config: SessionConfig,
    local: LocalPlayer,
    display_name: String,
    status: RoomStatus,
    /// The last shutdown offered a reconnect; the next connect restores
    /// the local player's permissions.
    reconnect_pending: bool,
    /// Teacher only; everyone else leaves it empty.
    roster: Roster,
    arbiter: OwnershipArbiter<SessionAction>,
    media: MediaSyncController,
    tools: ToolRack,
    canvases: CanvasBoards,
    objects: Option<SharedObjects>,
    slides: Option<SlideController>,
    bus: EventBus,
    outbox: Outbox,
    authority: A,
    broadcaster: B,
    backend: M,
}

impl<A, B, M> SessionContext<A, B, M>
where
    A: AuthorityPrimitive,
    B: Broadcaster,
    M: MediaBackend,
{
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_player(&self) -> &LocalPlayer {
        &self.local
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn arbiter(&self) -> &OwnershipArbiter<SessionAction> {
        &self.arbiter
    }

    pub fn media(&self) -> &MediaSyncController {
        &self.media
    }

    pub fn tools(&self) -> &ToolRack {
        &self.tools
    }

    pub fn canvases(&self) -> &CanvasBoards {
        &self.canvases
    }

    pub fn objects(&self) -> Option<&SharedObjects> {
        self.objects.as_ref()
    }

    pub fn slides(&self) -> Option<&SlideController> {
        self.slides.as_ref()
    }

    pub fn backend(&self) -> &M {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut M {
        &mut self.backend
    }

    pub fn subscribe(&mut self, topics: &[Topic]) -> SubscriberId {
        if topics.is_empty() {
            self.bus.subscribe()
        } else {
            self.bus.subscribe_to(topics)
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn drain_events(&mut self, id: SubscriberId) -> Vec<SessionEvent> {
        self.bus.drain(id)
    }

    fn register_entities(&mut self) {
        let mut entities = vec![self.media.entity()];
        entities.extend(self.tools.entities());
        entities.extend(self.tools.follow_targets());
        entities.extend(self.canvases.entities());
        entities.extend(self.objects.as_ref().map(SharedObjects::entity));
        entities.extend(self.slides.as_ref().map(SlideController::entity));
        for entity in entities {
            self.arbiter.spawn(entity, self.authority.owner_of(entity));
        }
    }

    fn is_teacher(&self) -> bool {
        self.local.mode() == PlayerMode::Teacher
    }

    pub fn set_status(&mut self, status: RoomStatus) {
        if self.status != status {
            debug!(from = ?self.status, to = ?status, "room status changed");
            self.status = status;
            self.bus.publish(SessionEvent::StatusChanged(status));
        }
    }

    // ========================================================================
    // Authority Dispatch
    // ========================================================================

    fn dispatch(&mut self, entity: EntityId, action: SessionAction, now: SessionTime) -> Result<()> {
        match self
            .arbiter
            .with_authority(&mut self.authority, entity, action, now)?
        {
            Dispatch::Run(action) => self.run(entity, action, now),
            Dispatch::Queued { replaced } => {
                debug!(entity, replaced, "action waiting for authority");
                Ok(())
            }
        }
    }

    fn run(&mut self, entity: EntityId, action: SessionAction, now: SessionTime) -> Result<()> {
        match action {
            SessionAction::Media(action) => {
                let mut io = MediaIo {
                    backend: &mut self.backend,
                    outbox: &mut self.outbox,
                    bus: &mut self.bus,
                };
                self.media.apply(action, &mut io, now)
            }
            SessionAction::Tool(action) => {
                self.tools
                    .apply(entity, action, &mut self.outbox, &mut self.bus)
            }
            SessionAction::Canvas(action) => {
                self.canvases
                    .apply(entity, action, &mut self.outbox, &mut self.bus)
            }
            SessionAction::Objects(action) => {
                let objects = self
                    .objects
                    .as_mut()
                    .ok_or(SessionError::MissingDependency("shared objects"))?;
                objects.apply(action, &mut self.outbox, &mut self.bus);
                Ok(())
            }
            SessionAction::Slides(action) => {
                let slides = self
                    .slides
                    .as_mut()
                    .ok_or(SessionError::MissingDependency("slide decks"))?;
                slides.apply(action, &mut self.outbox, &mut self.bus)
            }
        }
    }

    // ========================================================================
    // Media
    // ========================================================================

    /// Drive the shared video. Teacher only.
    pub fn media_action(&mut self, action: MediaAction, now: SessionTime) -> Result<()> {
        let entity = self.media.entity();
        if !self.is_teacher() {
            return Err(SessionError::NotAuthoritative(entity));
        }
        if let MediaAction::SelectClip(index) = action {
            let len = self.media.catalog().len();
            if index >= len {
                warn!(index, len, "clip selection out of range; ignored");
                return Err(SessionError::OutOfRangeSelection { index, len });
            }
        }
        self.dispatch(entity, SessionAction::Media(action), now)
    }

    pub fn select_clip(&mut self, index: usize, now: SessionTime) -> Result<()> {
        self.media_action(MediaAction::SelectClip(index), now)
    }

    pub fn fast_forward(&mut self, now: SessionTime) -> Result<()> {
        let step = self.config.media.skip_step_secs;
        self.media_action(MediaAction::FastForward { step }, now)
    }

    pub fn fast_backward(&mut self, now: SessionTime) -> Result<()> {
        let step = self.config.media.skip_step_secs;
        self.media_action(MediaAction::FastBackward { step }, now)
    }

    pub fn jump_to_mark(&mut self, direction: MarkDirection, now: SessionTime) -> Result<()> {
        self.media_action(MediaAction::JumpToMark(direction), now)
    }

    /// The teacher opened the clip menu; playback pauses while it is up.
    pub fn open_menu(&mut self, now: SessionTime) -> Result<()> {
        if self.media.open_menu() {
            self.media_action(MediaAction::Pause, now)?;
        }
        Ok(())
    }

    // ========================================================================
    // Interactive Entities
    // ========================================================================

    fn may_grab(&self, entity: EntityId) -> bool {
        let allowed = self.local.permissions().grab;
        if !allowed {
            debug!(entity, "grab permission not granted");
        }
        allowed
    }

    /// A local hand took hold of a tool. Taking a pen also asks for its
    /// target, so the target can be rebased once the pen is put down.
    pub fn grab(&mut self, entity: EntityId, hand: Hand, now: SessionTime) -> Result<()> {
        if !self.may_grab(entity) {
            return Ok(());
        }
        self.tools.grab_local(entity, hand)?;
        if let Some(target) = self.tools.get(entity).and_then(Tool::follow_target) {
            let outcome = self
                .arbiter
                .request_authority(&mut self.authority, target, now)?;
            debug!(entity, target, ?outcome, "pen target requested");
        }
        self.dispatch(entity, SessionAction::Tool(ToolAction::Grab(hand)), now)
    }

    /// A local hand let go of a tool.
    pub fn release(&mut self, entity: EntityId, hand: Hand, now: SessionTime) -> Result<()> {
        if !self.tools.get(entity).is_some_and(|t| t.local_hands().holds(hand)) {
            return Ok(());
        }
        self.tools.release_local(entity, hand)?;
        self.dispatch(entity, SessionAction::Tool(ToolAction::Release(hand)), now)
    }

    /// Replicate a tool's pose as the local peer moves it.
    pub fn move_tool(&mut self, entity: EntityId, pose: Pose, now: SessionTime) -> Result<()> {
        if !self.may_grab(entity) {
            return Ok(());
        }
        self.dispatch(entity, SessionAction::Tool(ToolAction::SetPose(pose)), now)
    }

    /// Put every tool nobody is holding back on the rack. Teacher only.
    pub fn reset_tools(&mut self, now: SessionTime) -> Result<()> {
        if !self.is_teacher() {
            warn!("only the teacher resets the tool rack");
            return Ok(());
        }
        for entity in self.tools.resettable() {
            self.dispatch(entity, SessionAction::Tool(ToolAction::Reset), now)?;
        }
        Ok(())
    }

    /// Flip, resize or move a board.
    ///
    /// Interactions start by acquiring authority; drag updates run only
    /// while it is held and are otherwise ignored.
    pub fn canvas_action(
        &mut self,
        entity: EntityId,
        action: CanvasAction,
        now: SessionTime,
    ) -> Result<()> {
        if !self.may_grab(entity) {
            return Ok(());
        }
        if action.starts_interaction() {
            return self.dispatch(entity, SessionAction::Canvas(action), now);
        }
        if self.authority.has_authority(entity) {
            self.run(entity, SessionAction::Canvas(action), now)
        } else {
            debug!(entity, kind = action.kind(), "drag update without authority");
            Ok(())
        }
    }

    fn objects_entity(&self) -> Result<EntityId> {
        self.objects
            .as_ref()
            .map(SharedObjects::entity)
            .ok_or(SessionError::MissingDependency("shared objects"))
    }

    /// Toggle a shared scene object. Teacher only.
    pub fn set_object_active(&mut self, index: usize, active: bool, now: SessionTime) -> Result<()> {
        let entity = self.objects_entity()?;
        if !self.is_teacher() {
            return Err(SessionError::NotAuthoritative(entity));
        }
        let action = match self.objects.as_mut() {
            Some(objects) => objects.set_active(index, active)?,
            None => return Err(SessionError::MissingDependency("shared objects")),
        };
        self.dispatch(entity, SessionAction::Objects(action), now)
    }

    /// Switch the room-wide passthrough view. Teacher only.
    pub fn set_passthrough(&mut self, enabled: bool, now: SessionTime) -> Result<()> {
        let entity = self.objects_entity()?;
        if !self.is_teacher() {
            return Err(SessionError::NotAuthoritative(entity));
        }
        let action = match self.objects.as_mut() {
            Some(objects) => objects.set_passthrough(enabled),
            None => return Err(SessionError::MissingDependency("shared objects")),
        };
        self.dispatch(entity, SessionAction::Objects(action), now)
    }

    fn slide_action(&mut self, action: SlideAction, now: SessionTime) -> Result<()> {
        let Some(slides) = self.slides.as_ref() else {
            return Err(SessionError::MissingDependency("slide decks"));
        };
        let entity = slides.entity();
        if !self.is_teacher() {
            return Err(SessionError::NotAuthoritative(entity));
        }
        if let SlideAction::SelectDeck(index) = action {
            slides.check_deck(index)?;
        }
        self.dispatch(entity, SessionAction::Slides(action), now)
    }

    /// Show a deck from its first page and close every peer's deck menu.
    /// Teacher only.
    pub fn select_deck(&mut self, index: usize, now: SessionTime) -> Result<()> {
        self.slide_action(SlideAction::SelectDeck(index), now)
    }

    pub fn next_slide(&mut self, now: SessionTime) -> Result<()> {
        self.slide_action(SlideAction::Next, now)
    }

    pub fn previous_slide(&mut self, now: SessionTime) -> Result<()> {
        self.slide_action(SlideAction::Previous, now)
    }

    // ========================================================================
    // Classroom Control
    // ========================================================================

    /// Grant or revoke a permission. Teacher only; returns false when
    /// nothing was sent.
    pub fn set_permission(&mut self, permission: Permission, enabled: bool, target: Target) -> bool {
        if !self.is_teacher() {
            warn!(?permission, "only the teacher issues permissions");
            return false;
        }
        let sender = self.local.peer();
        match permission_message(&mut self.roster, sender, permission, enabled, target) {
            Some(msg) => {
                info!(?permission, enabled, targets = ?msg.target_ids, "permission issued");
                self.outbox.push(Payload::Permission(msg));
                true
            }
            None => false,
        }
    }

    /// Issue a classroom command. Teacher only; returns false when nothing
    /// was sent.
    pub fn issue_command(&mut self, command: Command) -> bool {
        if !self.is_teacher() {
            warn!(?command, "only the teacher issues commands");
            return false;
        }
        let sender = self.local.peer();
        let Some(msg) = command_message(&mut self.roster, sender, command) else {
            return false;
        };
        info!(?command, targets = ?msg.target_ids, "command issued");
        self.outbox.push(Payload::Command(msg));

        match command {
            Command::ExitSession => self.set_status(RoomStatus::EndSession),
            Command::ClearBoard => self.bus.publish(SessionEvent::BoardCleared),
            Command::HideMenu => self.media.close_menu(),
            Command::ResetPlayer(_) | Command::Kick(_) => {}
        }
        true
    }

    fn on_command(&mut self, msg: SessionCommandProto) -> ValidationResult {
        let Ok(kind) = SessionCommandKind::try_from(msg.command) else {
            return ValidationResult::DroppedMalformed("unknown session command");
        };
        let me = self.local.peer();
        let named = msg.target_ids.contains(&me);

        match kind {
            SessionCommandKind::ResetPlayer | SessionCommandKind::ResetAll => {
                if named && self.local.mode() == PlayerMode::Student {
                    self.local.reset();
                    self.bus.publish(SessionEvent::LocalPlayerReset);
                }
            }
            SessionCommandKind::Kick => {
                if named {
                    info!(peer = me, "kicked by the teacher");
                    self.bus.publish(SessionEvent::Kicked);
                    self.set_status(RoomStatus::Disconnecting);
                }
            }
            SessionCommandKind::ExitSession => {
                info!("session ended by the teacher");
                self.set_status(RoomStatus::EndSession);
                self.bus.publish(SessionEvent::SessionExited);
            }
            SessionCommandKind::ClearBoard => self.bus.publish(SessionEvent::BoardCleared),
            SessionCommandKind::HideMenu => {
                self.media.close_menu();
                self.bus.publish(SessionEvent::HideMenu);
            }
        }
        ValidationResult::Accepted
    }

    fn on_permission(&mut self, msg: PermissionProto) -> ValidationResult {
        if PermissionKind::try_from(msg.kind).is_err() {
            return ValidationResult::DroppedMalformed("unknown permission kind");
        }
        if let Some((permission, enabled)) = self.local.apply(&msg) {
            info!(?permission, enabled, "permission changed");
            self.bus
                .publish(SessionEvent::PermissionChanged { permission, enabled });
        }
        ValidationResult::Accepted
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Decode, validate and apply one relay message.
    ///
    /// Returns why a message was dropped; only an undecodable payload is an
    /// error.
    pub fn receive(&mut self, bytes: &[u8], now: SessionTime) -> Result<ValidationResult> {
        let envelope = Envelope::decode(bytes)?;
        let verdict = validate_envelope(&envelope, self.local.peer());
        let (sender, Some(payload)) = (envelope.sender, envelope.payload) else {
            return Ok(verdict);
        };
        if !verdict.is_accepted() {
            return Ok(verdict);
        }

        let verdict = match payload {
            Payload::MediaState(m) => self.on_media_state(m),
            Payload::Audio(a) => self.on_audio(a),
            Payload::Cue(c) => self.on_cue(c),
            Payload::ClipSelect(c) => self.on_clip_select(c, now),
            Payload::Grab(g) => self.on_grab(g),
            Payload::Permission(p) => self.on_permission(p),
            Payload::Command(c) => self.on_command(c),
            Payload::ObjectState(o) => self.on_object_state(o),
            Payload::Pose(p) => self.on_pose(p),
            Payload::Slides(s) => self.on_slide_state(s),
        };

        match &verdict {
            ValidationResult::Accepted => {}
            ValidationResult::DroppedStale { stamp, newest } => {
                debug!(sender, ?stamp, ?newest, "stale message dropped");
            }
            dropped => warn!(sender, ?dropped, "inbound message dropped"),
        }
        Ok(verdict)
    }

    fn media_io(&mut self) -> (&mut MediaSyncController, MediaIo<'_>) {
        (
            &mut self.media,
            MediaIo {
                backend: &mut self.backend,
                outbox: &mut self.outbox,
                bus: &mut self.bus,
            },
        )
    }

    fn on_media_state(&mut self, m: MediaStateProto) -> ValidationResult {
        let verdict = validate_media_state(&m, self.media.newest_media_stamp());
        if !verdict.is_accepted() {
            return verdict;
        }
        let snapshot = match MediaReferenceSnapshot::try_from(m) {
            Ok(s) => s,
            Err(reason) => return ValidationResult::DroppedMalformed(reason),
        };
        let (media, mut io) = self.media_io();
        media.on_media_state(snapshot, &mut io);
        ValidationResult::Accepted
    }

    fn on_clip_select(&mut self, c: ClipSelectProto, now: SessionTime) -> ValidationResult {
        let verdict = validate_clip_select(
            &c,
            self.media.newest_selection_stamp(),
            self.media.catalog().len(),
        );
        if !verdict.is_accepted() {
            return verdict;
        }
        let (selection, reset) = match <(MediaSelection, MediaReferenceSnapshot)>::try_from(c) {
            Ok(parts) => parts,
            Err(reason) => return ValidationResult::DroppedMalformed(reason),
        };
        let (media, mut io) = self.media_io();
        media.on_clip_select(selection, reset, &mut io, now);
        ValidationResult::Accepted
    }

    fn on_audio(&mut self, a: AudioStateProto) -> ValidationResult {
        let verdict = validate_audio(&a, self.media.newest_audio_stamp());
        if !verdict.is_accepted() {
            return verdict;
        }
        let (stamp, audio) = match <(SnapshotStamp, lectern_core::AudioState)>::try_from(a) {
            Ok(parts) => parts,
            Err(reason) => return ValidationResult::DroppedMalformed(reason),
        };
        let (media, mut io) = self.media_io();
        media.on_audio(stamp, audio, &mut io);
        ValidationResult::Accepted
    }

    fn on_cue(&mut self, c: AnimationCueProto) -> ValidationResult {
        let Ok(action) = CueAction::try_from(c.action) else {
            return ValidationResult::DroppedMalformed("unknown cue action");
        };
        if !c.delta.is_finite() {
            return ValidationResult::DroppedNanInf;
        }
        self.bus.publish(SessionEvent::Cue {
            action,
            delta: c.delta,
        });
        ValidationResult::Accepted
    }

    fn on_grab(&mut self, g: GrabEventProto) -> ValidationResult {
        let verdict = validate_grab(&g);
        if !verdict.is_accepted() {
            return verdict;
        }
        if !self.tools.contains(g.entity_id) {
            return ValidationResult::DroppedMalformed("grab event for unknown tool");
        }
        self.tools.on_remote_grab(&g, &mut self.bus);
        ValidationResult::Accepted
    }

    fn on_pose(&mut self, p: EntityPoseProto) -> ValidationResult {
        let verdict = validate_pose(&p);
        if !verdict.is_accepted() {
            return verdict;
        }
        let pose = match Pose::try_from(&p) {
            Ok(pose) => pose,
            Err(reason) => return ValidationResult::DroppedMalformed(reason),
        };
        let entity = p.entity_id;
        if self.canvases.on_remote_pose(entity, pose, &mut self.bus)
            || self.tools.on_remote_pose(entity, pose, &mut self.bus)
        {
            ValidationResult::Accepted
        } else {
            ValidationResult::DroppedMalformed("pose for unknown entity")
        }
    }

    fn on_object_state(&mut self, o: ObjectStateProto) -> ValidationResult {
        let Some(objects) = self.objects.as_mut() else {
            return ValidationResult::DroppedMalformed("no shared objects in this scene");
        };
        let verdict = validate_object_state(&o, objects.newest_stamp(), objects.len());
        if !verdict.is_accepted() {
            return verdict;
        }
        let Some(stamp) = o.stamp.clone().map(SnapshotStamp::from) else {
            return ValidationResult::DroppedMalformed("missing snapshot stamp");
        };
        objects.on_remote(stamp, o, &mut self.bus);
        ValidationResult::Accepted
    }

    fn on_slide_state(&mut self, s: SlideStateProto) -> ValidationResult {
        let Some(slides) = self.slides.as_mut() else {
            return ValidationResult::DroppedMalformed("no slide decks in this scene");
        };
        let verdict = validate_slide_state(&s, slides.newest_stamp(), &slides.slide_counts());
        if !verdict.is_accepted() {
            return verdict;
        }
        let stamp = match s.decoded_stamp() {
            Ok(stamp) => stamp,
            Err(reason) => return ValidationResult::DroppedMalformed(reason),
        };
        slides.on_remote(
            stamp,
            s.deck_index as usize,
            s.slide_index as usize,
            &mut self.bus,
        );
        ValidationResult::Accepted
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn on_lifecycle(&mut self, event: LifecycleEvent, now: SessionTime) -> Result<()> {
        match event {
            LifecycleEvent::Connected { local_peer } => self.on_connected(local_peer),
            LifecycleEvent::SceneLoadComplete => {
                if self.is_teacher() && self.media.needs_default_selection() {
                    info!("no clip selected; selecting the first");
                    self.select_clip(0, now)?;
                }
            }
            LifecycleEvent::Disconnected => {
                debug!(status = ?self.status, "disconnected from relay");
                self.roster.clear();
            }
            LifecycleEvent::PlayerJoined {
                peer,
                display_name,
                mode,
            } => {
                if self.is_teacher() {
                    self.roster
                        .join(PlayerRecord::new(peer, display_name, mode));
                    self.bus.publish(SessionEvent::RosterChanged { peer });
                }
                self.resend_state();
            }
            LifecycleEvent::PlayerLeft { peer } => {
                if self.roster.leave(peer).is_some() {
                    self.bus.publish(SessionEvent::RosterChanged { peer });
                }
            }
            LifecycleEvent::Shutdown { reason } => self.on_shutdown(&reason),
            LifecycleEvent::Ping { peer, rtt_ms } => {
                self.roster.set_rtt(peer, rtt_ms);
            }
        }
        Ok(())
    }

    fn on_connected(&mut self, local_peer: PeerId) {
        let reconnecting = std::mem::take(&mut self.reconnect_pending);
        info!(peer = local_peer, mode = ?self.local.mode(), reconnecting, "connected");

        self.local.spawn(local_peer, reconnecting);
        self.outbox.set_sender(local_peer);
        self.media.set_local_peer(local_peer);
        if let Some(objects) = self.objects.as_mut() {
            objects.set_local_peer(local_peer);
        }
        if let Some(slides) = self.slides.as_mut() {
            slides.set_local_peer(local_peer);
        }
        self.arbiter = OwnershipArbiter::new(local_peer, self.config.authority.timeout_secs);
        self.register_entities();

        if self.is_teacher() {
            self.roster.join(PlayerRecord::new(
                local_peer,
                self.display_name.clone(),
                PlayerMode::Teacher,
            ));
        }
        self.set_status(RoomStatus::InRoom);
    }

    fn on_shutdown(&mut self, reason: &str) {
        let notice = shutdown_notice(self.status, reason);
        info!(status = ?self.status, reason, ?notice, "session shut down");
        self.reconnect_pending = notice == ShutdownNotice::ReconnectPrompt;
        self.roster.clear();
        self.bus.publish(SessionEvent::Shutdown(notice));
        self.set_status(RoomStatus::None);
    }

    /// Bring a late joiner up to date with state this peer is authority for.
    fn resend_state(&mut self) {
        if self.authority.has_authority(self.media.entity()) {
            self.media.resend_state(&mut self.outbox);
        }
        for entity in self.tools.entities() {
            if self.authority.has_authority(entity) {
                self.tools.resend_state(entity, &mut self.outbox);
            }
        }
        for entity in self.canvases.entities() {
            if self.authority.has_authority(entity) {
                self.canvases.resend_state(entity, &mut self.outbox);
            }
        }
        if let Some(objects) = self.objects.as_ref()
            && self.authority.has_authority(objects.entity())
        {
            objects.resend_state(&mut self.outbox);
        }
        if let Some(slides) = self.slides.as_ref()
            && self.authority.has_authority(slides.entity())
        {
            slides.resend_state(&mut self.outbox);
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the session to `now`: run actions whose authority arrived,
    /// step media sync, then send everything queued.
    pub fn tick(&mut self, now: SessionTime) {
        for outcome in self.arbiter.poll(&self.authority, now) {
            match outcome {
                AuthorityOutcome::Granted { entity, action, .. } => {
                    let kind = action.kind();
                    if let Err(err) = self.run(entity, action, now) {
                        warn!(entity, kind, %err, "granted action failed");
                    }
                }
                AuthorityOutcome::TimedOut { .. } => {}
            }
        }

        for pen in self.tools.pens() {
            if self.authority.has_authority(pen) {
                self.tools.follow(pen, &mut self.outbox, &mut self.bus);
            }
        }

        let authoritative = self.authority.has_authority(self.media.entity());
        let (media, mut io) = self.media_io();
        media.tick(&mut io, now, authoritative);

        self.flush();
    }

    /// Send every queued broadcast to the relay.
    pub fn flush(&mut self) {
        for envelope in self.outbox.drain() {
            let Some(channel) = envelope.channel() else {
                continue;
            };
            self.broadcaster
                .broadcast(channel, envelope.encode_to_vec(), true);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
