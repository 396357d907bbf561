//! Shared slide decks.
//!
//! The peer holding authority over the slide entity owns the active deck and
//! page. Selecting a deck starts it at its first page and hides the deck
//! menu on every other peer; next and previous stop at the deck's ends.

use lectern_core::{ActionKind, EntityId, PeerId, SnapshotStamp};
use lectern_wire::envelope::Payload;
use lectern_wire::{SessionCommandKind, SessionCommandProto, SlideStateProto};
use tracing::{debug, warn};

use crate::bus::{EventBus, SessionEvent};
use crate::error::{Result, SessionError};
use crate::outbox::Outbox;

/// A named deck with a fixed number of pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideDeck {
    pub name: String,
    pub slide_count: usize,
}

impl SlideDeck {
    pub fn new(name: impl Into<String>, slide_count: usize) -> Self {
        Self {
            name: name.into(),
            slide_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideAction {
    SelectDeck(usize),
    Next,
    Previous,
}

impl ActionKind for SlideAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::SelectDeck(_) => "slides.select",
            Self::Next => "slides.next",
            Self::Previous => "slides.prev",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlideController {
    entity: EntityId,
    local_peer: PeerId,
    decks: Vec<SlideDeck>,
    /// `None` until a deck is chosen; the first deck is shown meanwhile.
    deck: Option<usize>,
    index: usize,
    newest: Option<SnapshotStamp>,
    max_seen: SnapshotStamp,
}

impl SlideController {
    pub fn new(entity: EntityId, local_peer: PeerId, decks: Vec<SlideDeck>) -> Self {
        Self {
            entity,
            local_peer,
            decks,
            deck: None,
            index: 0,
            newest: None,
            max_seen: SnapshotStamp::default(),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn decks(&self) -> &[SlideDeck] {
        &self.decks
    }

    pub fn deck(&self) -> Option<usize> {
        self.deck
    }

    /// Page shown from the active deck, zero-based.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Page count of the deck on screen.
    pub fn slide_count(&self) -> usize {
        self.decks
            .get(self.deck.unwrap_or(0))
            .map_or(0, |d| d.slide_count)
    }

    pub fn slide_counts(&self) -> Vec<usize> {
        self.decks.iter().map(|d| d.slide_count).collect()
    }

    pub fn newest_stamp(&self) -> Option<SnapshotStamp> {
        self.newest
    }

    pub fn set_local_peer(&mut self, peer: PeerId) {
        self.local_peer = peer;
    }

    /// Reject deck indices the local catalog does not have.
    pub fn check_deck(&self, index: usize) -> Result<()> {
        let len = self.decks.len();
        if index >= len {
            warn!(index, len, "deck selection out of range; ignored");
            return Err(SessionError::OutOfRangeSelection { index, len });
        }
        Ok(())
    }

    /// Run an action the local peer holds authority for.
    pub fn apply(&mut self, action: SlideAction, outbox: &mut Outbox, bus: &mut EventBus) -> Result<()> {
        match action {
            SlideAction::SelectDeck(deck) => {
                self.check_deck(deck)?;
                self.deck = Some(deck);
                self.index = 0;
                self.publish(outbox, bus);
                outbox.push(Payload::Command(SessionCommandProto {
                    command: SessionCommandKind::HideMenu as i32,
                    target_ids: Vec::new(),
                }));
            }
            SlideAction::Next => {
                if self.index + 1 < self.slide_count() {
                    self.index += 1;
                    self.publish(outbox, bus);
                }
            }
            SlideAction::Previous => {
                if self.index > 0 {
                    self.index -= 1;
                    self.publish(outbox, bus);
                }
            }
        }
        Ok(())
    }

    fn publish(&mut self, outbox: &mut Outbox, bus: &mut EventBus) {
        self.max_seen = self.max_seen.next(self.local_peer);
        let stamp = self.max_seen;
        self.newest = Some(stamp);
        let deck = self.deck.unwrap_or(0);
        debug!(entity = self.entity, deck, index = self.index, ?stamp, "slide state written");

        outbox.push(Payload::Slides(SlideStateProto::new(stamp, deck, self.index)));
        bus.publish(SessionEvent::SlideChanged {
            deck,
            index: self.index,
        });
    }

    /// Re-send the active deck and page for a late joiner.
    pub fn resend_state(&self, outbox: &mut Outbox) {
        if let (Some(stamp), Some(deck)) = (self.newest, self.deck) {
            outbox.push(Payload::Slides(SlideStateProto::new(stamp, deck, self.index)));
        }
    }

    /// Adopt a validated slide state from the authority.
    pub fn on_remote(&mut self, stamp: SnapshotStamp, deck: usize, index: usize, bus: &mut EventBus) {
        self.max_seen = self.max_seen.max(stamp);
        self.newest = Some(stamp);
        self.deck = Some(deck);
        self.index = index;
        bus.publish(SessionEvent::SlideChanged { deck, index });
    }
}
