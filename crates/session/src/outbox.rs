use lectern_core::PeerId;
use lectern_wire::{Envelope, envelope::Payload};

/// Broadcasts produced while handling one call, flushed to the relay by the
/// session context.
#[derive(Debug, Default)]
pub struct Outbox {
    sender: PeerId,
    messages: Vec<Envelope>,
}

impl Outbox {
    pub fn new(sender: PeerId) -> Self {
        Self {
            sender,
            messages: Vec::new(),
        }
    }

    pub fn sender(&self) -> PeerId {
        self.sender
    }

    /// Peer ids can change across reconnects.
    pub fn set_sender(&mut self, sender: PeerId) {
        self.sender = sender;
    }

    pub fn push(&mut self, payload: Payload) {
        self.messages.push(Envelope::new(self.sender, payload));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Envelope] {
        &self.messages
    }

    pub fn drain(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.messages)
    }
}
