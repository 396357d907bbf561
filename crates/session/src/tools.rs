//! Grabbable classroom tools.
//!
//! A tool tracks the local hands holding it and, separately, the hands other
//! peers report through grab events. The local hand set changes at once; the
//! held flag is only broadcast by the peer holding authority, so grab and
//! release travel through the arbiter as [`ToolAction`]s.
//!
//! A pen additionally follows a target entity on the board. While nobody
//! holds it, the pen's authority keeps it on the target. Taking hold and
//! letting go both move the target onto the pen, so the pen never jumps
//! when it changes hands or is put down.

use std::collections::BTreeMap;

use lectern_core::{ActionKind, EntityId, GrabHolderState, Hand, Pose};
use lectern_wire::envelope::Payload;
use lectern_wire::{EntityPoseProto, GrabEventProto, HandProto};
use tracing::{debug, warn};

use crate::bus::{EventBus, SessionEvent};
use crate::error::{Result, SessionError};
use crate::outbox::Outbox;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    /// Broadcast that `hand` took hold.
    Grab(Hand),
    /// Broadcast that `hand` let go.
    Release(Hand),
    /// Replicate the tool's current pose.
    SetPose(Pose),
    /// Put the tool back on the rack.
    Reset,
}

impl ActionKind for ToolAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Grab(_) => "tool.grab",
            Self::Release(_) => "tool.release",
            Self::SetPose(_) => "tool.pose",
            Self::Reset => "tool.reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PenFollow {
    target_entity: EntityId,
    target: Pose,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    entity: EntityId,
    spawn_pose: Pose,
    pose: Pose,
    local: GrabHolderState,
    /// Hands other peers reported, shown as ghost hands.
    remote: GrabHolderState,
    follow: Option<PenFollow>,
}

impl Tool {
    fn new(entity: EntityId, spawn_pose: Pose) -> Self {
        Self {
            entity,
            spawn_pose,
            pose: spawn_pose,
            local: GrabHolderState::new(),
            remote: GrabHolderState::new(),
            follow: None,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn spawn_pose(&self) -> Pose {
        self.spawn_pose
    }

    pub fn local_hands(&self) -> &GrabHolderState {
        &self.local
    }

    pub fn remote_hands(&self) -> &GrabHolderState {
        &self.remote
    }

    /// Held by anyone in the room.
    pub fn is_held(&self) -> bool {
        self.local.is_held() || self.remote.is_held()
    }

    /// Entity a pen follows while free.
    pub fn follow_target(&self) -> Option<EntityId> {
        self.follow.map(|f| f.target_entity)
    }

    pub fn target_pose(&self) -> Option<Pose> {
        self.follow.map(|f| f.target)
    }

    /// Move a pen's target onto the pen and broadcast it.
    fn rebase_target(&mut self, outbox: &mut Outbox) {
        let Some(follow) = self.follow.as_mut() else {
            return;
        };
        follow.target = self.pose;
        outbox.push(Payload::Pose(EntityPoseProto::new(
            follow.target_entity,
            &follow.target,
        )));
    }
}

/// Every grabbable tool in the scene.
#[derive(Debug, Clone, Default)]
pub struct ToolRack {
    tools: BTreeMap<EntityId, Tool>,
}

impl ToolRack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: EntityId, spawn_pose: Pose) {
        self.tools.insert(entity, Tool::new(entity, spawn_pose));
    }

    /// A pen that follows `target_entity` while nobody holds it. The target
    /// starts on the pen.
    pub fn add_pen(&mut self, entity: EntityId, target_entity: EntityId, spawn_pose: Pose) {
        let mut tool = Tool::new(entity, spawn_pose);
        tool.follow = Some(PenFollow {
            target_entity,
            target: spawn_pose,
        });
        self.tools.insert(entity, tool);
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.tools.contains_key(&entity)
    }

    /// Pen target entities.
    pub fn follow_targets(&self) -> Vec<EntityId> {
        self.tools.values().filter_map(Tool::follow_target).collect()
    }

    /// Pens, ascending by entity id.
    pub fn pens(&self) -> Vec<EntityId> {
        self.tools
            .values()
            .filter(|t| t.follow.is_some())
            .map(|t| t.entity)
            .collect()
    }

    pub fn get(&self, entity: EntityId) -> Option<&Tool> {
        self.tools.get(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.tools.keys().copied()
    }

    fn tool_mut(&mut self, entity: EntityId) -> Result<&mut Tool> {
        self.tools
            .get_mut(&entity)
            .ok_or(SessionError::Core(lectern_core::Error::UnknownEntity(entity)))
    }

    /// Record a local hand taking hold. Returns true if the tool went from
    /// free to held, in which case the held flag must be broadcast.
    pub fn grab_local(&mut self, entity: EntityId, hand: Hand) -> Result<bool> {
        Ok(self.tool_mut(entity)?.local.grab(hand))
    }

    /// Record a local hand letting go. Returns true if no local hand remains.
    pub fn release_local(&mut self, entity: EntityId, hand: Hand) -> Result<bool> {
        Ok(self.tool_mut(entity)?.local.release(hand))
    }

    /// Tools nobody holds, ascending by entity id.
    pub fn resettable(&self) -> Vec<EntityId> {
        self.tools
            .values()
            .filter(|t| !t.is_held())
            .map(|t| t.entity)
            .collect()
    }

    /// Run an action the local peer holds authority for.
    pub fn apply(
        &mut self,
        entity: EntityId,
        action: ToolAction,
        outbox: &mut Outbox,
        bus: &mut EventBus,
    ) -> Result<()> {
        let tool = self.tool_mut(entity)?;
        match action {
            ToolAction::Grab(hand) | ToolAction::Release(hand) => {
                let grabbed = matches!(action, ToolAction::Grab(_));
                outbox.push(Payload::Grab(GrabEventProto {
                    entity_id: entity,
                    hand: HandProto::from(hand) as i32,
                    grabbed,
                    held: tool.local.is_held(),
                }));
                if grabbed || !tool.local.is_held() {
                    tool.rebase_target(outbox);
                }
            }
            ToolAction::SetPose(pose) => {
                tool.pose = pose;
                outbox.push(Payload::Pose(EntityPoseProto::new(entity, &pose)));
            }
            ToolAction::Reset => {
                if tool.is_held() {
                    debug!(entity, "tool picked up before reset ran; skipped");
                    return Ok(());
                }
                tool.pose = tool.spawn_pose;
                outbox.push(Payload::Pose(EntityPoseProto::new(entity, &tool.pose)));
                tool.rebase_target(outbox);
                bus.publish(SessionEvent::PoseChanged { entity });
            }
        }
        Ok(())
    }

    /// Keep a free pen on its target. Run only by the pen's authority;
    /// returns true if the pen moved.
    pub fn follow(&mut self, entity: EntityId, outbox: &mut Outbox, bus: &mut EventBus) -> bool {
        let Some(tool) = self.tools.get_mut(&entity) else {
            return false;
        };
        let Some(follow) = tool.follow else {
            return false;
        };
        if tool.is_held() || tool.pose == follow.target {
            return false;
        }
        tool.pose = follow.target;
        outbox.push(Payload::Pose(EntityPoseProto::new(entity, &tool.pose)));
        bus.publish(SessionEvent::PoseChanged { entity });
        true
    }

    /// Re-send a tool's pose, the local hands on it and a pen's target for
    /// a late joiner. Poses still at spawn are skipped.
    pub fn resend_state(&self, entity: EntityId, outbox: &mut Outbox) {
        let Some(tool) = self.tools.get(&entity) else {
            return;
        };
        if tool.pose != tool.spawn_pose {
            outbox.push(Payload::Pose(EntityPoseProto::new(entity, &tool.pose)));
        }
        for hand in tool.local.hands() {
            outbox.push(Payload::Grab(GrabEventProto {
                entity_id: entity,
                hand: HandProto::from(hand) as i32,
                grabbed: true,
                held: true,
            }));
        }
        if let Some(follow) = tool.follow
            && follow.target != tool.spawn_pose
        {
            outbox.push(Payload::Pose(EntityPoseProto::new(
                follow.target_entity,
                &follow.target,
            )));
        }
    }

    /// Apply a validated grab event from another peer.
    pub fn on_remote_grab(&mut self, event: &GrabEventProto, bus: &mut EventBus) {
        let Some(tool) = self.tools.get_mut(&event.entity_id) else {
            warn!(entity = event.entity_id, "grab event for unknown tool");
            return;
        };
        let Ok(hand) = event.decoded_hand() else {
            return;
        };

        if event.grabbed {
            tool.remote.grab(hand);
        } else {
            tool.remote.release(hand);
        }
        if !event.held {
            tool.remote.clear();
        }
        bus.publish(SessionEvent::GhostHand {
            entity: event.entity_id,
            hand,
            visible: event.grabbed,
        });
    }

    /// Apply a tool or pen target pose from its authority. Returns false for
    /// unknown entities.
    pub fn on_remote_pose(&mut self, entity: EntityId, pose: Pose, bus: &mut EventBus) -> bool {
        if let Some(tool) = self.tools.get_mut(&entity) {
            tool.pose = pose;
            bus.publish(SessionEvent::PoseChanged { entity });
            return true;
        }
        let follow = self
            .tools
            .values_mut()
            .filter_map(|t| t.follow.as_mut())
            .find(|f| f.target_entity == entity);
        match follow {
            Some(follow) => {
                follow.target = pose;
                bus.publish(SessionEvent::PoseChanged { entity });
                true
            }
            None => false,
        }
    }
}
