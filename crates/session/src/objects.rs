//! Replicated scene object toggles and the room-wide passthrough flag.
//!
//! Local edits are staged per field. The full state is written to the room
//! after authority over the sync entity is acquired, so a burst of toggles
//! while waiting collapses into one broadcast. Remote writes that land while
//! waiting update the unstaged fields only.

use lectern_core::{ActionKind, EntityId, PeerId, SnapshotStamp};
use lectern_wire::ObjectStateProto;
use lectern_wire::envelope::Payload;
use tracing::{debug, warn};

use crate::bus::{EventBus, SessionEvent};
use crate::error::{Result, SessionError};
use crate::outbox::Outbox;

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectsAction {
    /// Write the staged edits over the newest committed state.
    Publish,
}

impl ActionKind for ObjectsAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Publish => "objects.publish",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedObjects {
    entity: EntityId,
    local_peer: PeerId,
    staged: Vec<Option<bool>>,
    staged_passthrough: Option<bool>,
    active: Vec<bool>,
    passthrough: bool,
    newest: Option<SnapshotStamp>,
    max_seen: SnapshotStamp,
}

impl SharedObjects {
    /// `count` objects, all initially active, passthrough off.
    pub fn new(entity: EntityId, local_peer: PeerId, count: usize) -> Self {
        Self {
            entity,
            local_peer,
            staged: vec![None; count],
            staged_passthrough: None,
            active: vec![true; count],
            passthrough: false,
            newest: None,
            max_seen: SnapshotStamp::default(),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Committed flags, as last written to the room.
    pub fn active(&self) -> &[bool] {
        &self.active
    }

    pub fn passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn newest_stamp(&self) -> Option<SnapshotStamp> {
        self.newest
    }

    pub fn set_local_peer(&mut self, peer: PeerId) {
        self.local_peer = peer;
    }

    /// True while local edits wait for authority.
    pub fn has_staged(&self) -> bool {
        self.staged_passthrough.is_some() || self.staged.iter().any(Option::is_some)
    }

    /// Committed state with the staged edits laid over it.
    pub fn desired(&self) -> (Vec<bool>, bool) {
        let active = self
            .active
            .iter()
            .zip(&self.staged)
            .map(|(committed, staged)| staged.unwrap_or(*committed))
            .collect();
        (active, self.staged_passthrough.unwrap_or(self.passthrough))
    }

    /// Stage an object toggle and return the write to run under authority.
    pub fn set_active(&mut self, index: usize, active: bool) -> Result<ObjectsAction> {
        let len = self.staged.len();
        let Some(slot) = self.staged.get_mut(index) else {
            warn!(index, len, "object toggle out of range");
            return Err(SessionError::OutOfRangeSelection { index, len });
        };
        *slot = Some(active);
        Ok(ObjectsAction::Publish)
    }

    pub fn set_passthrough(&mut self, enabled: bool) -> ObjectsAction {
        self.staged_passthrough = Some(enabled);
        ObjectsAction::Publish
    }

    /// Run an action the local peer holds authority for.
    pub fn apply(&mut self, action: ObjectsAction, outbox: &mut Outbox, bus: &mut EventBus) {
        let ObjectsAction::Publish = action;
        let (active, passthrough) = self.desired();
        self.staged.fill(None);
        self.staged_passthrough = None;

        self.max_seen = self.max_seen.next(self.local_peer);
        let stamp = self.max_seen;
        self.newest = Some(stamp);
        self.active = active;
        self.passthrough = passthrough;
        debug!(entity = self.entity, ?stamp, "object state written");

        outbox.push(Payload::ObjectState(ObjectStateProto {
            stamp: Some(stamp.into()),
            active: self.active.clone(),
            passthrough,
        }));
        bus.publish(SessionEvent::ObjectsChanged {
            active: self.active.clone(),
            passthrough,
        });
    }

    /// Re-send the committed state for a late joiner.
    pub fn resend_state(&self, outbox: &mut Outbox) {
        if let Some(stamp) = self.newest {
            outbox.push(Payload::ObjectState(ObjectStateProto {
                stamp: Some(stamp.into()),
                active: self.active.clone(),
                passthrough: self.passthrough,
            }));
        }
    }

    /// Apply a validated object state from the authority.
    pub fn on_remote(&mut self, stamp: SnapshotStamp, state: ObjectStateProto, bus: &mut EventBus) {
        self.max_seen = self.max_seen.max(stamp);
        self.newest = Some(stamp);
        if self.has_staged() {
            debug!(entity = self.entity, ?stamp, "remote object state under staged edits");
        }
        self.active = state.active;
        self.passthrough = state.passthrough;
        bus.publish(SessionEvent::ObjectsChanged {
            active: self.active.clone(),
            passthrough: self.passthrough,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_toggles_collapse_into_one_write() {
        let mut objects = SharedObjects::new(60, 1, 3);
        objects.set_active(0, false).unwrap();
        let action = objects.set_passthrough(true);
        assert_eq!(objects.active(), &[true, true, true], "nothing committed yet");

        let mut outbox = Outbox::new(1);
        let mut bus = EventBus::new();
        objects.apply(action, &mut outbox, &mut bus);

        assert_eq!(objects.active(), &[false, true, true]);
        assert!(objects.passthrough());
        assert_eq!(objects.newest_stamp(), Some(SnapshotStamp::new(1, 1)));
        assert_eq!(outbox.drain().len(), 1);
    }

    #[test]
    fn test_out_of_range_toggle() {
        let mut objects = SharedObjects::new(60, 1, 2);
        assert!(matches!(
            objects.set_active(2, true),
            Err(SessionError::OutOfRangeSelection { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_remote_state_advances_stamps() {
        let mut objects = SharedObjects::new(60, 2, 2);
        let mut bus = EventBus::new();
        objects.on_remote(
            SnapshotStamp::new(7, 1),
            ObjectStateProto {
                stamp: Some(SnapshotStamp::new(7, 1).into()),
                active: vec![false, false],
                passthrough: true,
            },
            &mut bus,
        );
        assert_eq!(objects.active(), &[false, false]);

        let mut outbox = Outbox::new(2);
        let action = objects.set_active(1, true).unwrap();
        objects.apply(action, &mut outbox, &mut bus);
        assert_eq!(objects.newest_stamp(), Some(SnapshotStamp::new(8, 2)));
        assert!(objects.passthrough());
    }

    #[test]
    fn test_remote_write_keeps_staged_edits() {
        let mut objects = SharedObjects::new(60, 2, 3);
        let mut bus = EventBus::new();
        let mut outbox = Outbox::new(2);

        let action = objects.set_active(0, false).unwrap();
        objects.on_remote(
            SnapshotStamp::new(4, 1),
            ObjectStateProto {
                stamp: Some(SnapshotStamp::new(4, 1).into()),
                active: vec![true, true, false],
                passthrough: true,
            },
            &mut bus,
        );
        assert_eq!(objects.active(), &[true, true, false]);
        assert_eq!(objects.desired(), (vec![false, true, false], true));

        objects.apply(action, &mut outbox, &mut bus);
        assert_eq!(objects.active(), &[false, true, false]);
        assert!(objects.passthrough());
        assert!(!objects.has_staged());
        assert_eq!(objects.newest_stamp(), Some(SnapshotStamp::new(5, 2)));
    }
}
