//! Player roster and room status.
//!
//! Only the teacher keeps a roster. Students and supervisors track their own
//! record and nothing else.

use std::collections::BTreeMap;

use lectern_core::PeerId;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerMode {
    Teacher,
    Student,
    /// Observer; never targeted by roster-wide commands.
    Supervisor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub player_id: PeerId,
    pub display_name: String,
    pub mode: PlayerMode,
    pub grab_permission: bool,
    pub lock_movement: bool,
    pub mic_on: bool,
    pub hidden: bool,
    pub rtt_ms: u32,
}

impl PlayerRecord {
    /// Record with the permissions a freshly spawned player starts with.
    pub fn new(player_id: PeerId, display_name: impl Into<String>, mode: PlayerMode) -> Self {
        Self {
            player_id,
            display_name: display_name.into(),
            mode,
            grab_permission: mode == PlayerMode::Teacher,
            lock_movement: mode == PlayerMode::Student,
            mic_on: mode == PlayerMode::Teacher,
            hidden: false,
            rtt_ms: 0,
        }
    }

    pub fn is_student(&self) -> bool {
        self.mode == PlayerMode::Student
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: BTreeMap<PeerId, PlayerRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a player's record.
    pub fn join(&mut self, record: PlayerRecord) {
        info!(peer = record.player_id, mode = ?record.mode, name = %record.display_name, "player joined");
        self.players.insert(record.player_id, record);
    }

    pub fn leave(&mut self, peer: PeerId) -> Option<PlayerRecord> {
        let removed = self.players.remove(&peer);
        if removed.is_some() {
            info!(peer, "player left");
        }
        removed
    }

    pub fn get(&self, peer: PeerId) -> Option<&PlayerRecord> {
        self.players.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut PlayerRecord> {
        self.players.get_mut(&peer)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values()
    }

    /// Student ids other than `except`, ascending.
    pub fn student_ids(&self, except: PeerId) -> Vec<PeerId> {
        self.players
            .values()
            .filter(|p| p.is_student() && p.player_id != except)
            .map(|p| p.player_id)
            .collect()
    }

    pub fn has_teacher(&self) -> bool {
        self.players.values().any(|p| p.mode == PlayerMode::Teacher)
    }

    pub fn set_rtt(&mut self, peer: PeerId, rtt_ms: u32) -> bool {
        match self.players.get_mut(&peer) {
            Some(p) => {
                p.rtt_ms = rtt_ms;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        if !self.players.is_empty() {
            debug!(count = self.players.len(), "roster cleared");
        }
        self.players.clear();
    }
}

// ============================================================================
// Room Status & Shutdown
// ============================================================================

/// Where the local peer is in the connect/leave flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoomStatus {
    #[default]
    None,
    InLobby,
    Creating,
    Joining,
    InRoom,
    Disconnecting,
    /// The teacher ended the session for everyone.
    EndSession,
}

/// What the local peer should tell its user when the relay shuts down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownNotice {
    /// Never made it into the room.
    ConnectFailed { reason: String },
    /// Dropped out of a live session; offer to reconnect.
    ReconnectPrompt,
    /// Left on purpose.
    Left,
    EndedByTeacher,
    /// Shut down outside a session; nothing to show.
    Silent,
}

/// Map a shutdown to the notice for the status the peer was in.
pub fn shutdown_notice(status: RoomStatus, reason: &str) -> ShutdownNotice {
    match status {
        RoomStatus::Creating | RoomStatus::Joining => ShutdownNotice::ConnectFailed {
            reason: reason.to_string(),
        },
        RoomStatus::InRoom => ShutdownNotice::ReconnectPrompt,
        RoomStatus::Disconnecting => ShutdownNotice::Left,
        RoomStatus::EndSession => ShutdownNotice::EndedByTeacher,
        RoomStatus::None | RoomStatus::InLobby => ShutdownNotice::Silent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        let mut r = Roster::new();
        r.join(PlayerRecord::new(1, "Ms. Rivera", PlayerMode::Teacher));
        r.join(PlayerRecord::new(4, "Ada", PlayerMode::Student));
        r.join(PlayerRecord::new(2, "Ben", PlayerMode::Student));
        r.join(PlayerRecord::new(9, "Inspector", PlayerMode::Supervisor));
        r
    }

    #[test]
    fn test_initial_permissions_by_mode() {
        let teacher = PlayerRecord::new(1, "T", PlayerMode::Teacher);
        assert!(teacher.grab_permission);
        assert!(!teacher.lock_movement);
        assert!(teacher.mic_on);

        let student = PlayerRecord::new(2, "S", PlayerMode::Student);
        assert!(!student.grab_permission);
        assert!(student.lock_movement);
        assert!(!student.mic_on);
    }

    #[test]
    fn test_student_ids_exclude_supervisors_and_self() {
        let r = roster();
        assert_eq!(r.student_ids(1), vec![2, 4]);
        assert_eq!(r.student_ids(2), vec![4]);
    }

    #[test]
    fn test_leave_and_rtt() {
        let mut r = roster();
        assert!(r.set_rtt(4, 38));
        assert_eq!(r.get(4).map(|p| p.rtt_ms), Some(38));

        assert!(r.leave(4).is_some());
        assert!(r.leave(4).is_none());
        assert!(!r.set_rtt(4, 10));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn test_shutdown_notice_mapping() {
        assert_eq!(
            shutdown_notice(RoomStatus::Joining, "GameNotFound"),
            ShutdownNotice::ConnectFailed {
                reason: "GameNotFound".into()
            }
        );
        assert_eq!(
            shutdown_notice(RoomStatus::InRoom, "x"),
            ShutdownNotice::ReconnectPrompt
        );
        assert_eq!(
            shutdown_notice(RoomStatus::EndSession, "x"),
            ShutdownNotice::EndedByTeacher
        );
        assert_eq!(shutdown_notice(RoomStatus::None, "x"), ShutdownNotice::Silent);
    }
}
