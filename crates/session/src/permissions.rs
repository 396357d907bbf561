//! Teacher-issued permissions and classroom commands.
//!
//! The teacher builds the outbound messages from its roster; every other
//! peer applies only the parts that name its own player id, and only while
//! in student mode.

use lectern_core::PeerId;
use lectern_wire::{PermissionKind, PermissionProto, SessionCommandKind, SessionCommandProto};
use tracing::{debug, warn};

use crate::roster::{PlayerMode, Roster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Grab,
    Mic,
    LockMovement,
}

impl From<Permission> for PermissionKind {
    fn from(p: Permission) -> Self {
        match p {
            Permission::Grab => Self::Grab,
            Permission::Mic => Self::Mic,
            Permission::LockMovement => Self::LockMovement,
        }
    }
}

impl From<PermissionKind> for Permission {
    fn from(k: PermissionKind) -> Self {
        match k {
            PermissionKind::Grab => Self::Grab,
            PermissionKind::Mic => Self::Mic,
            PermissionKind::LockMovement => Self::LockMovement,
        }
    }
}

/// Who a teacher command is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Player(PeerId),
    /// Every student except the sender. Supervisors are never included.
    AllStudents,
}

// ============================================================================
// Local Permission State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalPermissions {
    pub grab: bool,
    pub mic_on: bool,
    pub lock_movement: bool,
}

impl LocalPermissions {
    /// Permissions a player spawns with.
    pub fn initial(mode: PlayerMode) -> Self {
        Self {
            grab: mode == PlayerMode::Teacher,
            mic_on: mode == PlayerMode::Teacher,
            lock_movement: mode == PlayerMode::Student,
        }
    }

    pub fn get(&self, permission: Permission) -> bool {
        match permission {
            Permission::Grab => self.grab,
            Permission::Mic => self.mic_on,
            Permission::LockMovement => self.lock_movement,
        }
    }

    /// Returns true if the value changed.
    pub fn set(&mut self, permission: Permission, enabled: bool) -> bool {
        let slot = match permission {
            Permission::Grab => &mut self.grab,
            Permission::Mic => &mut self.mic_on,
            Permission::LockMovement => &mut self.lock_movement,
        };
        let changed = *slot != enabled;
        *slot = enabled;
        changed
    }
}

/// The local player's own permission state.
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    peer: PeerId,
    mode: PlayerMode,
    permissions: LocalPermissions,
    /// Last state seen in the room, restored after a reconnect.
    remembered: Option<LocalPermissions>,
}

impl LocalPlayer {
    pub fn new(peer: PeerId, mode: PlayerMode) -> Self {
        Self {
            peer,
            mode,
            permissions: LocalPermissions::initial(mode),
            remembered: None,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn mode(&self) -> PlayerMode {
        self.mode
    }

    pub fn permissions(&self) -> LocalPermissions {
        self.permissions
    }

    /// Called when the local avatar spawns. A reconnect restores the last
    /// known state; otherwise the mode's initial permissions apply.
    pub fn spawn(&mut self, peer: PeerId, reconnecting: bool) {
        self.peer = peer;
        self.permissions = match (reconnecting, self.remembered) {
            (true, Some(saved)) => {
                debug!(peer, "restoring permissions after reconnect");
                saved
            }
            _ => LocalPermissions::initial(self.mode),
        };
        self.remembered = Some(self.permissions);
    }

    /// Apply an inbound permission change. Returns the change to publish,
    /// or `None` when the message is not for this player.
    pub fn apply(&mut self, msg: &PermissionProto) -> Option<(Permission, bool)> {
        if self.mode != PlayerMode::Student || !msg.target_ids.contains(&self.peer) {
            return None;
        }
        let Ok(kind) = PermissionKind::try_from(msg.kind) else {
            warn!(kind = msg.kind, "unknown permission kind");
            return None;
        };
        let permission = Permission::from(kind);
        self.permissions.set(permission, msg.enabled);
        self.remembered = Some(self.permissions);
        Some((permission, msg.enabled))
    }

    /// Back to the mode's initial permissions.
    pub fn reset(&mut self) {
        self.permissions = LocalPermissions::initial(self.mode);
        self.remembered = Some(self.permissions);
    }
}

// ============================================================================
// Teacher Side
// ============================================================================

fn resolve(roster: &Roster, sender: PeerId, target: Target) -> Vec<PeerId> {
    match target {
        Target::Player(peer) => match roster.get(peer) {
            Some(p) if p.is_student() && peer != sender => vec![peer],
            Some(_) => {
                warn!(peer, "command target is not a student");
                Vec::new()
            }
            None => {
                warn!(peer, "command target not in roster");
                Vec::new()
            }
        },
        Target::AllStudents => roster.student_ids(sender),
    }
}

/// Build a permission change and mirror it into the teacher's roster.
///
/// `None` when no student matches the target.
pub fn permission_message(
    roster: &mut Roster,
    sender: PeerId,
    permission: Permission,
    enabled: bool,
    target: Target,
) -> Option<PermissionProto> {
    let target_ids = resolve(roster, sender, target);
    if target_ids.is_empty() {
        return None;
    }

    for id in &target_ids {
        if let Some(record) = roster.get_mut(*id) {
            match permission {
                Permission::Grab => record.grab_permission = enabled,
                Permission::Mic => record.mic_on = enabled,
                Permission::LockMovement => record.lock_movement = enabled,
            }
        }
    }

    Some(PermissionProto {
        kind: PermissionKind::from(permission) as i32,
        enabled,
        target_ids,
    })
}

/// A teacher-issued classroom command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ResetPlayer(Target),
    Kick(PeerId),
    ExitSession,
    ClearBoard,
    HideMenu,
}

/// Build the wire message for a command. `None` when a targeted command
/// matches no student.
pub fn command_message(
    roster: &mut Roster,
    sender: PeerId,
    command: Command,
) -> Option<SessionCommandProto> {
    let (kind, target_ids) = match command {
        Command::ResetPlayer(Target::AllStudents) => {
            let ids = resolve(roster, sender, Target::AllStudents);
            for id in &ids {
                if let Some(record) = roster.get_mut(*id) {
                    let initial = LocalPermissions::initial(record.mode);
                    record.grab_permission = initial.grab;
                    record.mic_on = initial.mic_on;
                    record.lock_movement = initial.lock_movement;
                }
            }
            (SessionCommandKind::ResetAll, ids)
        }
        Command::ResetPlayer(target) => (
            SessionCommandKind::ResetPlayer,
            resolve(roster, sender, target),
        ),
        Command::Kick(peer) => (
            SessionCommandKind::Kick,
            resolve(roster, sender, Target::Player(peer)),
        ),
        Command::ExitSession => (SessionCommandKind::ExitSession, Vec::new()),
        Command::ClearBoard => (SessionCommandKind::ClearBoard, Vec::new()),
        Command::HideMenu => (SessionCommandKind::HideMenu, Vec::new()),
    };

    let targeted = matches!(
        kind,
        SessionCommandKind::ResetAll | SessionCommandKind::ResetPlayer | SessionCommandKind::Kick
    );
    if targeted && target_ids.is_empty() {
        return None;
    }

    Some(SessionCommandProto {
        command: kind as i32,
        target_ids,
    })
}
