//! Ownership tokens and the authority arbiter.
//!
//! Before an interactive entity mutates shared state, the local peer must
//! hold state authority over it. The relay decides who holds authority; the
//! arbiter tracks local intent only: which entities have an outstanding
//! request, and which actions are parked until the grant shows up.
//!
//! Per-entity state machine:
//!
//! ```text
//! Idle --request--> Requesting --granted--> Granted (sticky)
//!                       |
//!                       +--timeout--> TimedOut --next poll--> Idle
//! ```
//!
//! Granted only leaves via another peer taking authority; the arbiter never
//! releases on its own. A timed-out action is dropped, never retried.
//!
//! Parked actions are keyed by `(entity, ActionKind::kind)`: queueing a new
//! action of the same kind on the same entity cancels the previous one, so
//! there is at most one in-flight wait per entity per operation kind.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{EntityId, Error, PeerId, Result, SessionTime};

/// Default budget for an authority handoff, in seconds.
pub const AUTHORITY_TIMEOUT_SECS: f64 = 2.0;

// ============================================================================
// Collaborator Contract
// ============================================================================

/// The relay's object-ownership primitive, as seen from the local peer.
pub trait AuthorityPrimitive {
    /// True when the local peer currently holds state authority over `entity`.
    fn has_authority(&self, entity: EntityId) -> bool;

    /// Ask the relay to transfer authority over `entity` to the local peer.
    ///
    /// Fire-and-forget: a rejected request is never reported, the grant just
    /// never shows up in [`has_authority`](Self::has_authority).
    fn request_authority(&mut self, entity: EntityId);

    /// Current authority holder as last reported by the relay.
    fn owner_of(&self, entity: EntityId) -> Option<PeerId>;
}

/// Operation kind of an action parked behind an authority wait.
pub trait ActionKind {
    /// Stable name of the operation, also used in log events.
    fn kind(&self) -> &'static str;
}

// ============================================================================
// Ownership Token
// ============================================================================

/// Local view of an entity's authority handoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthorityState {
    /// No outstanding request.
    Idle,
    /// A transfer request is outstanding since the given session time.
    Requesting { since: SessionTime },
    /// The local peer holds authority.
    Granted,
    /// The last request expired; becomes `Idle` on the next poll.
    TimedOut,
}

/// Ownership bookkeeping for one networked entity.
///
/// Created when the entity spawns, dropped when it despawns.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipToken {
    entity_id: EntityId,
    current_owner_id: Option<PeerId>,
    state: AuthorityState,
}

impl OwnershipToken {
    fn new(entity_id: EntityId, owner: Option<PeerId>) -> Self {
        Self {
            entity_id,
            current_owner_id: owner,
            state: AuthorityState::Idle,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Last known authority holder.
    pub fn current_owner_id(&self) -> Option<PeerId> {
        self.current_owner_id
    }

    pub fn state(&self) -> AuthorityState {
        self.state
    }

    pub fn pending_request(&self) -> bool {
        matches!(self.state, AuthorityState::Requesting { .. })
    }

    pub fn request_issued_at(&self) -> Option<SessionTime> {
        match self.state {
            AuthorityState::Requesting { since } => Some(since),
            _ => None,
        }
    }

    fn mark_granted(&mut self, local_peer: PeerId) {
        self.current_owner_id = Some(local_peer);
        self.state = AuthorityState::Granted;
    }
}

// ============================================================================
// Arbiter Results
// ============================================================================

/// Result of [`OwnershipArbiter::request_authority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Authority already held locally; nothing was sent.
    AlreadyHeld,
    /// A request is already outstanding; nothing was sent.
    AlreadyPending,
    /// A transfer request was handed to the relay.
    Sent,
}

/// Result of [`OwnershipArbiter::with_authority`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<T> {
    /// Authority is held: run the action now.
    Run(T),
    /// The action is parked until the grant arrives or the budget runs out.
    Queued {
        /// A previous action of the same kind was cancelled.
        replaced: bool,
    },
}

/// Completion of a parked action, reported by [`OwnershipArbiter::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityOutcome<T> {
    /// Authority arrived; the caller must run `action` now.
    ///
    /// Entities with parent-relative offsets recenter before running it.
    Granted {
        entity: EntityId,
        action: T,
        waited: f64,
    },
    /// The budget ran out; `action` is abandoned.
    TimedOut { entity: EntityId, action: T },
}

impl<T> AuthorityOutcome<T> {
    pub fn entity(&self) -> EntityId {
        match self {
            Self::Granted { entity, .. } | Self::TimedOut { entity, .. } => *entity,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

// ============================================================================
// Arbiter
// ============================================================================

struct PendingWait<T> {
    entity: EntityId,
    kind: &'static str,
    action: T,
    started_at: SessionTime,
}

/// Authority acquisition for every interactive entity owned by one peer.
///
/// `T` is the caller's action type; [`ActionKind::kind`] decides which
/// parked actions cancel each other.
pub struct OwnershipArbiter<T> {
    local_peer: PeerId,
    timeout: f64,
    tokens: BTreeMap<EntityId, OwnershipToken>,
    /// Parked actions in queue order.
    waits: Vec<PendingWait<T>>,
}

impl<T: ActionKind> OwnershipArbiter<T> {
    /// Create an arbiter for `local_peer` with the given handoff budget.
    ///
    /// # Panics
    /// If `timeout_secs` is not a positive finite number.
    pub fn new(local_peer: PeerId, timeout_secs: f64) -> Self {
        assert!(
            timeout_secs.is_finite() && timeout_secs > 0.0,
            "authority timeout must be positive"
        );

        Self {
            local_peer,
            timeout: timeout_secs,
            tokens: BTreeMap::new(),
            waits: Vec::new(),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Register a spawned entity. Re-spawning a known entity keeps its token.
    pub fn spawn(&mut self, entity: EntityId, owner: Option<PeerId>) {
        self.tokens
            .entry(entity)
            .or_insert_with(|| OwnershipToken::new(entity, owner));
    }

    /// Drop an entity's token along with any actions parked on it.
    ///
    /// Returns the number of cancelled actions.
    pub fn despawn(&mut self, entity: EntityId) -> usize {
        self.tokens.remove(&entity);
        let before = self.waits.len();
        self.waits.retain(|w| w.entity != entity);
        let dropped = before - self.waits.len();
        if dropped > 0 {
            debug!(entity, dropped, "despawn cancelled pending authority waits");
        }
        dropped
    }

    pub fn token(&self, entity: EntityId) -> Option<&OwnershipToken> {
        self.tokens.get(&entity)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &OwnershipToken> {
        self.tokens.values()
    }

    /// Number of parked actions across all entities.
    pub fn pending_waits(&self) -> usize {
        self.waits.len()
    }

    /// True if any action is parked on `entity`.
    pub fn has_pending(&self, entity: EntityId) -> bool {
        self.waits.iter().any(|w| w.entity == entity)
    }

    /// Request authority over `entity` without parking anything.
    ///
    /// Idempotent: when authority is already held, or a request is already
    /// outstanding, nothing reaches the relay.
    pub fn request_authority<P>(
        &mut self,
        primitive: &mut P,
        entity: EntityId,
        now: SessionTime,
    ) -> Result<RequestOutcome>
    where
        P: AuthorityPrimitive + ?Sized,
    {
        let local_peer = self.local_peer;
        let token = self
            .tokens
            .get_mut(&entity)
            .ok_or(Error::UnknownEntity(entity))?;

        if primitive.has_authority(entity) {
            token.mark_granted(local_peer);
            return Ok(RequestOutcome::AlreadyHeld);
        }

        if token.pending_request() {
            return Ok(RequestOutcome::AlreadyPending);
        }

        primitive.request_authority(entity);
        token.state = AuthorityState::Requesting { since: now };
        debug!(entity, now, "authority requested");
        Ok(RequestOutcome::Sent)
    }

    /// Park `action` until authority over `entity` is granted.
    ///
    /// Cancels a parked action of the same kind on the same entity and
    /// reports whether that happened. Does not contact the relay; pair with
    /// [`request_authority`](Self::request_authority) or use
    /// [`with_authority`](Self::with_authority).
    pub fn await_authority(
        &mut self,
        entity: EntityId,
        action: T,
        now: SessionTime,
    ) -> Result<bool> {
        if !self.tokens.contains_key(&entity) {
            return Err(Error::UnknownEntity(entity));
        }

        let kind = action.kind();
        let before = self.waits.len();
        self.waits.retain(|w| !(w.entity == entity && w.kind == kind));
        let replaced = self.waits.len() != before;
        if replaced {
            debug!(entity, kind, "superseded pending authority wait");
        }

        self.waits.push(PendingWait {
            entity,
            kind,
            action,
            started_at: now,
        });
        Ok(replaced)
    }

    /// Run `action` now if authority is held, otherwise request and park it.
    pub fn with_authority<P>(
        &mut self,
        primitive: &mut P,
        entity: EntityId,
        action: T,
        now: SessionTime,
    ) -> Result<Dispatch<T>>
    where
        P: AuthorityPrimitive + ?Sized,
    {
        match self.request_authority(primitive, entity, now)? {
            RequestOutcome::AlreadyHeld => Ok(Dispatch::Run(action)),
            RequestOutcome::Sent | RequestOutcome::AlreadyPending => {
                let replaced = self.await_authority(entity, action, now)?;
                Ok(Dispatch::Queued { replaced })
            }
        }
    }

    /// Advance every handoff to `now`.
    ///
    /// Refreshes tokens from the relay's view, then resolves parked actions
    /// in queue order: granted ones are returned for the caller to run,
    /// expired ones are returned as `TimedOut` and dropped.
    pub fn poll<P>(&mut self, primitive: &P, now: SessionTime) -> Vec<AuthorityOutcome<T>>
    where
        P: AuthorityPrimitive + ?Sized,
    {
        self.refresh_tokens(primitive, now);

        let mut outcomes = Vec::new();
        let waits = std::mem::take(&mut self.waits);

        for wait in waits {
            if !self.tokens.contains_key(&wait.entity) {
                continue;
            }

            if primitive.has_authority(wait.entity) {
                let waited = now - wait.started_at;
                debug!(entity = wait.entity, kind = wait.kind, waited, "authority granted");
                outcomes.push(AuthorityOutcome::Granted {
                    entity: wait.entity,
                    action: wait.action,
                    waited,
                });
            } else if now - wait.started_at >= self.timeout {
                debug!(
                    entity = wait.entity,
                    kind = wait.kind,
                    "authority wait timed out; action dropped"
                );
                if let Some(token) = self.tokens.get_mut(&wait.entity)
                    && token.pending_request()
                {
                    token.state = AuthorityState::TimedOut;
                }
                outcomes.push(AuthorityOutcome::TimedOut {
                    entity: wait.entity,
                    action: wait.action,
                });
            } else {
                self.waits.push(wait);
            }
        }

        outcomes
    }

    fn refresh_tokens<P>(&mut self, primitive: &P, now: SessionTime)
    where
        P: AuthorityPrimitive + ?Sized,
    {
        let local_peer = self.local_peer;
        let timeout = self.timeout;

        for token in self.tokens.values_mut() {
            let entity = token.entity_id;
            if primitive.has_authority(entity) {
                token.mark_granted(local_peer);
                continue;
            }

            token.current_owner_id = primitive.owner_of(entity);
            token.state = match token.state {
                AuthorityState::Granted => {
                    debug!(entity, owner = ?token.current_owner_id, "authority taken by another peer");
                    AuthorityState::Idle
                }
                AuthorityState::TimedOut => AuthorityState::Idle,
                AuthorityState::Requesting { since } if now - since >= timeout => {
                    AuthorityState::TimedOut
                }
                state => state,
            };
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const LOCAL: PeerId = 7;
    const REMOTE: PeerId = 3;
    const BOARD: EntityId = 100;
    const PEN: EntityId = 101;

    #[derive(Debug, Clone, PartialEq)]
    enum Act {
        Move(i32),
        Flip,
    }

    impl ActionKind for Act {
        fn kind(&self) -> &'static str {
            match self {
                Self::Move(_) => "move",
                Self::Flip => "flip",
            }
        }
    }

    #[derive(Default)]
    struct FakeRelay {
        owners: HashMap<EntityId, PeerId>,
        requests: Vec<EntityId>,
    }

    impl FakeRelay {
        fn grant(&mut self, entity: EntityId, peer: PeerId) {
            self.owners.insert(entity, peer);
        }
    }

    impl AuthorityPrimitive for FakeRelay {
        fn has_authority(&self, entity: EntityId) -> bool {
            self.owners.get(&entity) == Some(&LOCAL)
        }

        fn request_authority(&mut self, entity: EntityId) {
            self.requests.push(entity);
        }

        fn owner_of(&self, entity: EntityId) -> Option<PeerId> {
            self.owners.get(&entity).copied()
        }
    }

    fn arbiter() -> OwnershipArbiter<Act> {
        let mut arbiter = OwnershipArbiter::new(LOCAL, AUTHORITY_TIMEOUT_SECS);
        arbiter.spawn(BOARD, Some(REMOTE));
        arbiter.spawn(PEN, None);
        arbiter
    }

    #[test]
    fn test_request_is_noop_when_already_held() {
        let mut relay = FakeRelay::default();
        relay.grant(BOARD, LOCAL);
        let mut arbiter = arbiter();

        let outcome = arbiter.request_authority(&mut relay, BOARD, 0.0).unwrap();
        assert_eq!(outcome, RequestOutcome::AlreadyHeld);
        let outcome = arbiter.request_authority(&mut relay, BOARD, 0.1).unwrap();
        assert_eq!(outcome, RequestOutcome::AlreadyHeld);

        assert!(relay.requests.is_empty(), "no network effect expected");
        let token = arbiter.token(BOARD).unwrap();
        assert_eq!(token.state(), AuthorityState::Granted);
        assert_eq!(token.current_owner_id(), Some(LOCAL));
    }

    #[test]
    fn test_request_sent_once_while_pending() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();

        assert_eq!(
            arbiter.request_authority(&mut relay, BOARD, 1.0).unwrap(),
            RequestOutcome::Sent
        );
        assert_eq!(
            arbiter.request_authority(&mut relay, BOARD, 1.2).unwrap(),
            RequestOutcome::AlreadyPending
        );
        assert_eq!(relay.requests, vec![BOARD]);

        let token = arbiter.token(BOARD).unwrap();
        assert!(token.pending_request());
        assert_eq!(token.request_issued_at(), Some(1.0));
    }

    #[test]
    fn test_with_authority_runs_immediately_when_held() {
        let mut relay = FakeRelay::default();
        relay.grant(PEN, LOCAL);
        let mut arbiter = arbiter();

        let dispatch = arbiter
            .with_authority(&mut relay, PEN, Act::Move(1), 0.0)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Run(Act::Move(1)));
        assert_eq!(arbiter.pending_waits(), 0);
    }

    #[test]
    fn test_queued_action_runs_after_grant() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();

        let dispatch = arbiter
            .with_authority(&mut relay, BOARD, Act::Flip, 10.0)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Queued { replaced: false });

        // Not granted yet: nothing to run.
        assert!(arbiter.poll(&relay, 10.5).is_empty());
        assert!(arbiter.has_pending(BOARD));

        relay.grant(BOARD, LOCAL);
        let outcomes = arbiter.poll(&relay, 10.75);
        assert_eq!(
            outcomes,
            vec![AuthorityOutcome::Granted {
                entity: BOARD,
                action: Act::Flip,
                waited: 0.75,
            }]
        );
        assert_eq!(arbiter.token(BOARD).unwrap().state(), AuthorityState::Granted);
        assert!(!arbiter.has_pending(BOARD));
    }

    #[test]
    fn test_wait_times_out_and_returns_to_idle() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();

        arbiter
            .with_authority(&mut relay, BOARD, Act::Move(5), 0.0)
            .unwrap();

        assert!(arbiter.poll(&relay, 1.99).is_empty());
        let outcomes = arbiter.poll(&relay, 2.0);
        assert_eq!(
            outcomes,
            vec![AuthorityOutcome::TimedOut {
                entity: BOARD,
                action: Act::Move(5),
            }]
        );
        assert_eq!(arbiter.token(BOARD).unwrap().state(), AuthorityState::TimedOut);

        // The dropped action is gone for good.
        assert!(arbiter.poll(&relay, 2.1).is_empty());
        assert_eq!(arbiter.token(BOARD).unwrap().state(), AuthorityState::Idle);

        // A fresh gesture sends a fresh request.
        assert_eq!(
            arbiter.request_authority(&mut relay, BOARD, 3.0).unwrap(),
            RequestOutcome::Sent
        );
        assert_eq!(relay.requests, vec![BOARD, BOARD]);
    }

    #[test]
    fn test_same_kind_wait_is_superseded() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();

        arbiter
            .with_authority(&mut relay, BOARD, Act::Move(1), 0.0)
            .unwrap();
        let dispatch = arbiter
            .with_authority(&mut relay, BOARD, Act::Move(2), 0.1)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Queued { replaced: true });

        // Different kind on the same entity coexists.
        let dispatch = arbiter
            .with_authority(&mut relay, BOARD, Act::Flip, 0.2)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Queued { replaced: false });
        assert_eq!(arbiter.pending_waits(), 2);

        relay.grant(BOARD, LOCAL);
        let actions: Vec<_> = arbiter
            .poll(&relay, 0.5)
            .into_iter()
            .map(|o| match o {
                AuthorityOutcome::Granted { action, .. } => action,
                AuthorityOutcome::TimedOut { .. } => panic!("unexpected timeout"),
            })
            .collect();
        assert_eq!(actions, vec![Act::Move(2), Act::Flip]);
    }

    #[test]
    fn test_same_kind_on_other_entity_is_independent() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();

        arbiter
            .with_authority(&mut relay, BOARD, Act::Move(1), 0.0)
            .unwrap();
        let dispatch = arbiter
            .with_authority(&mut relay, PEN, Act::Move(1), 0.0)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Queued { replaced: false });
        assert_eq!(arbiter.pending_waits(), 2);
    }

    #[test]
    fn test_despawn_drops_token_and_waits() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();

        arbiter
            .with_authority(&mut relay, PEN, Act::Flip, 0.0)
            .unwrap();
        assert_eq!(arbiter.despawn(PEN), 1);
        assert!(arbiter.token(PEN).is_none());

        relay.grant(PEN, LOCAL);
        assert!(arbiter.poll(&relay, 0.1).is_empty());
        assert_eq!(
            arbiter.request_authority(&mut relay, PEN, 0.2),
            Err(Error::UnknownEntity(PEN))
        );
    }

    #[test]
    fn test_granted_is_sticky_until_taken() {
        let mut relay = FakeRelay::default();
        relay.grant(BOARD, LOCAL);
        let mut arbiter = arbiter();
        arbiter.request_authority(&mut relay, BOARD, 0.0).unwrap();

        arbiter.poll(&relay, 100.0);
        assert_eq!(arbiter.token(BOARD).unwrap().state(), AuthorityState::Granted);

        relay.grant(BOARD, REMOTE);
        arbiter.poll(&relay, 101.0);
        let token = arbiter.token(BOARD).unwrap();
        assert_eq!(token.state(), AuthorityState::Idle);
        assert_eq!(token.current_owner_id(), Some(REMOTE));
    }

    /// Peer A's action waits for the handoff; B's mutation is the last one
    /// applied before it.
    #[test]
    fn test_handoff_orders_actions() {
        let mut relay = FakeRelay::default();
        relay.grant(BOARD, REMOTE);
        let mut arbiter = arbiter();
        let mut applied: Vec<(PeerId, i32)> = Vec::new();

        // A (local) asks while B (remote) holds the board.
        let dispatch = arbiter
            .with_authority(&mut relay, BOARD, Act::Move(42), 0.0)
            .unwrap();
        assert!(matches!(dispatch, Dispatch::Queued { .. }));

        // B keeps acting until the relay moves authority.
        applied.push((REMOTE, 1));
        assert!(arbiter.poll(&relay, 0.1).is_empty());
        applied.push((REMOTE, 2));

        relay.grant(BOARD, LOCAL);
        for outcome in arbiter.poll(&relay, 0.2) {
            if let AuthorityOutcome::Granted {
                action: Act::Move(v),
                ..
            } = outcome
            {
                assert!(relay.has_authority(BOARD));
                applied.push((LOCAL, v));
            }
        }

        assert_eq!(applied, vec![(REMOTE, 1), (REMOTE, 2), (LOCAL, 42)]);
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let mut relay = FakeRelay::default();
        let mut arbiter = arbiter();
        assert_eq!(
            arbiter.with_authority(&mut relay, 999, Act::Flip, 0.0),
            Err(Error::UnknownEntity(999))
        );
    }

    #[test]
    #[should_panic(expected = "authority timeout must be positive")]
    fn test_zero_timeout_panics() {
        let _ = OwnershipArbiter::<Act>::new(LOCAL, 0.0);
    }
}
