//! Multi-hand holder state for grabbable entities.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hand {
    Left,
    Right,
}

/// Which hands currently hold an entity.
///
/// `is_held()` is derived from the hand set, so it can never disagree with
/// it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrabHolderState {
    hands: BTreeSet<Hand>,
}

impl GrabHolderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        !self.hands.is_empty()
    }

    pub fn holds(&self, hand: Hand) -> bool {
        self.hands.contains(&hand)
    }

    pub fn hands(&self) -> impl Iterator<Item = Hand> + '_ {
        self.hands.iter().copied()
    }

    /// Add a hand. Returns true if the entity went from free to held.
    pub fn grab(&mut self, hand: Hand) -> bool {
        let was_held = self.is_held();
        self.hands.insert(hand);
        !was_held
    }

    /// Remove a hand. Returns true if the entity went from held to free.
    pub fn release(&mut self, hand: Hand) -> bool {
        self.hands.remove(&hand) && self.hands.is_empty()
    }

    pub fn clear(&mut self) {
        self.hands.clear();
    }
}
