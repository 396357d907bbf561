//! Movable drawing boards.
//!
//! The networked transform is the board's parent; the visible canvas is its
//! child. Flip, resize and move each start by taking authority and folding
//! the child's offset back into the parent, so the board never pops when a
//! different peer picks it up. Only the parent pose is replicated.

use std::collections::BTreeMap;

use glam::Vec3;
use lectern_core::{ActionKind, EntityId, MoveDrag, ParentedPose, Pose, ResizeDrag};
use lectern_wire::EntityPoseProto;
use lectern_wire::envelope::Payload;
use tracing::debug;

use crate::bus::{EventBus, SessionEvent};
use crate::config::CanvasConfig;
use crate::error::{Result, SessionError};
use crate::outbox::Outbox;

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasAction {
    /// Turn the board 180° about its vertical axis.
    Flip,
    BeginResize { pointer: Vec3 },
    Resize { pointer: Vec3 },
    BeginMove { viewer: Pose, pointer: Vec3 },
    Move { viewer: Pose, pointer: Vec3 },
    EndDrag,
}

impl CanvasAction {
    /// Actions that open an interaction and may wait for authority.
    pub fn starts_interaction(&self) -> bool {
        matches!(
            self,
            Self::Flip | Self::BeginResize { .. } | Self::BeginMove { .. }
        )
    }
}

impl ActionKind for CanvasAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Flip => "canvas.flip",
            Self::BeginResize { .. } => "canvas.begin_resize",
            Self::Resize { .. } => "canvas.resize",
            Self::BeginMove { .. } => "canvas.begin_move",
            Self::Move { .. } => "canvas.move",
            Self::EndDrag => "canvas.end_drag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Drag {
    Resize(ResizeDrag),
    Move(MoveDrag),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    entity: EntityId,
    pose: ParentedPose,
    drag: Option<Drag>,
    /// The parent pose has been broadcast at least once.
    replicated: bool,
}

impl Canvas {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn pose(&self) -> &ParentedPose {
        &self.pose
    }

    pub fn dragging(&self) -> bool {
        self.drag.is_some()
    }

    fn scale(&self) -> f32 {
        self.pose.parent.scale.x
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanvasBoards {
    config: CanvasConfig,
    boards: BTreeMap<EntityId, Canvas>,
}

impl CanvasBoards {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            config,
            boards: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, entity: EntityId, pose: ParentedPose) {
        self.boards.insert(
            entity,
            Canvas {
                entity,
                pose,
                drag: None,
                replicated: false,
            },
        );
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.boards.contains_key(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<&Canvas> {
        self.boards.get(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.boards.keys().copied()
    }

    /// Run an action the local peer holds authority for.
    pub fn apply(
        &mut self,
        entity: EntityId,
        action: CanvasAction,
        outbox: &mut Outbox,
        bus: &mut EventBus,
    ) -> Result<()> {
        let config = &self.config;
        let board = self
            .boards
            .get_mut(&entity)
            .ok_or(SessionError::Core(lectern_core::Error::UnknownEntity(entity)))?;

        if action.starts_interaction() && board.pose.recenter() {
            debug!(entity, "board recentred on its canvas");
        }

        match action {
            CanvasAction::Flip => board.pose.flip(),
            CanvasAction::BeginResize { pointer } => {
                board.drag = Some(Drag::Resize(ResizeDrag::begin(pointer, board.scale())));
                return Ok(());
            }
            CanvasAction::Resize { pointer } => {
                let Some(Drag::Resize(drag)) = board.drag else {
                    return Ok(());
                };
                let origin = board.pose.parent.position;
                let Some(scale) =
                    drag.scale_at(origin, pointer, config.min_scale, config.max_scale)
                else {
                    return Ok(());
                };
                board.pose.parent.scale = Vec3::splat(scale);
            }
            CanvasAction::BeginMove { viewer, pointer } => {
                let origin = board.pose.parent.position;
                board.drag = Some(Drag::Move(MoveDrag::begin(&viewer, pointer, origin)));
                return Ok(());
            }
            CanvasAction::Move { viewer, pointer } => {
                let Some(Drag::Move(drag)) = board.drag else {
                    return Ok(());
                };
                let bounds = config.room_bounds();
                let (position, rotation) =
                    drag.pose_at(&viewer, pointer, config.pitch_clamp_deg, bounds.as_ref());
                board.pose.parent.position = position;
                board.pose.parent.rotation = rotation;
            }
            CanvasAction::EndDrag => {
                board.drag = None;
                return Ok(());
            }
        }

        outbox.push(Payload::Pose(EntityPoseProto::new(
            entity,
            &board.pose.parent,
        )));
        board.replicated = true;
        bus.publish(SessionEvent::PoseChanged { entity });
        Ok(())
    }

    /// Re-send a board's parent pose for a late joiner. Boards still at
    /// their scene pose are skipped; the joiner loads the same one.
    pub fn resend_state(&self, entity: EntityId, outbox: &mut Outbox) {
        if let Some(board) = self.boards.get(&entity)
            && board.replicated
        {
            outbox.push(Payload::Pose(EntityPoseProto::new(
                entity,
                &board.pose.parent,
            )));
        }
    }

    /// Adopt the authority's parent pose. The authority's canvas sits at the
    /// parent origin, so the local offset is dropped. Returns false for
    /// unknown entities.
    pub fn on_remote_pose(&mut self, entity: EntityId, pose: Pose, bus: &mut EventBus) -> bool {
        let Some(board) = self.boards.get_mut(&entity) else {
            return false;
        };
        board.pose.parent = pose;
        board.pose.local.position = Vec3::ZERO;
        board.drag = None;
        board.replicated = true;
        bus.publish(SessionEvent::PoseChanged { entity });
        true
    }
}
