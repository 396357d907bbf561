//! Publish/subscribe fan-out of session events to local listeners.
//!
//! Listeners subscribe when they activate and unsubscribe when they
//! deactivate. Each subscriber has its own queue, drained at its own pace.
//!
//! Queues are bounded. A subscriber that stops draining loses its oldest
//! events first; [`EventBus::dropped`] reports how many.

use std::collections::{BTreeMap, VecDeque};

use lectern_core::{AudioState, EntityId, Hand, PeerId};
use lectern_wire::CueAction;
use tracing::debug;

use crate::permissions::Permission;
use crate::roster::{RoomStatus, ShutdownNotice};

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    // Media
    BufferingChanged(bool),
    SelectionChanged { index: usize },
    PlaybackChanged { playing: bool, time: f64 },
    AudioChanged(AudioState),
    Cue { action: CueAction, delta: f64 },
    HideMenu,
    /// Display time for the seek slider, `None` once the playhead caught up.
    SliderLock(Option<f64>),
    SlideChanged { deck: usize, index: usize },

    // Classroom control, local player only
    PermissionChanged { permission: Permission, enabled: bool },
    LocalPlayerReset,
    Kicked,
    SessionExited,
    BoardCleared,

    // Interactive entities
    GhostHand { entity: EntityId, hand: Hand, visible: bool },
    PoseChanged { entity: EntityId },
    ObjectsChanged { active: Vec<bool>, passthrough: bool },

    // Session
    RosterChanged { peer: PeerId },
    StatusChanged(RoomStatus),
    Shutdown(ShutdownNotice),
}

/// Coarse grouping used for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    Media,
    Control,
    Interaction,
    Session,
}

impl SessionEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::BufferingChanged(_)
            | Self::SelectionChanged { .. }
            | Self::PlaybackChanged { .. }
            | Self::AudioChanged(_)
            | Self::Cue { .. }
            | Self::HideMenu
            | Self::SliderLock(_)
            | Self::SlideChanged { .. } => Topic::Media,
            Self::PermissionChanged { .. }
            | Self::LocalPlayerReset
            | Self::Kicked
            | Self::SessionExited
            | Self::BoardCleared => Topic::Control,
            Self::GhostHand { .. } | Self::PoseChanged { .. } | Self::ObjectsChanged { .. } => {
                Topic::Interaction
            }
            Self::RosterChanged { .. } | Self::StatusChanged(_) | Self::Shutdown(_) => {
                Topic::Session
            }
        }
    }
}

struct Subscriber {
    /// `None` receives every topic.
    topics: Option<Vec<Topic>>,
    queue: VecDeque<SessionEvent>,
    dropped: u64,
}

impl Subscriber {
    fn wants(&self, topic: Topic) -> bool {
        self.topics.as_ref().is_none_or(|t| t.contains(&topic))
    }
}

/// Events held per subscriber before the oldest are discarded.
pub const DEFAULT_QUEUE_LIMIT: usize = 1024;

pub struct EventBus {
    next_id: u64,
    queue_limit: usize,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_queue_limit(DEFAULT_QUEUE_LIMIT)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose subscribers hold at most `limit` undrained events
    /// (at least one).
    pub fn with_queue_limit(limit: usize) -> Self {
        Self {
            next_id: 0,
            queue_limit: limit.max(1),
            subscribers: BTreeMap::new(),
        }
    }

    /// Subscribe to every event.
    pub fn subscribe(&mut self) -> SubscriberId {
        self.insert(None)
    }

    /// Subscribe to the listed topics only.
    pub fn subscribe_to(&mut self, topics: &[Topic]) -> SubscriberId {
        self.insert(Some(topics.to_vec()))
    }

    fn insert(&mut self, topics: Option<Vec<Topic>>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.insert(
            id,
            Subscriber {
                topics,
                queue: VecDeque::new(),
                dropped: 0,
            },
        );
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&mut self, event: SessionEvent) {
        let topic = event.topic();
        for (id, sub) in self.subscribers.iter_mut() {
            if !sub.wants(topic) {
                continue;
            }
            if sub.queue.len() >= self.queue_limit {
                sub.queue.pop_front();
                sub.dropped += 1;
                debug!(subscriber = id.0, dropped = sub.dropped, "event queue full; dropped oldest");
            }
            sub.queue.push_back(event.clone());
        }
    }

    /// Events discarded from `id`'s queue because it was full.
    pub fn dropped(&self, id: SubscriberId) -> u64 {
        self.subscribers.get(&id).map_or(0, |s| s.dropped)
    }

    /// Take every event queued for `id`, oldest first.
    pub fn drain(&mut self, id: SubscriberId) -> Vec<SessionEvent> {
        self.subscribers
            .get_mut(&id)
            .map(|s| s.queue.drain(..).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(SessionEvent::BufferingChanged(true));
        bus.publish(SessionEvent::BufferingChanged(false));

        let expected = vec![
            SessionEvent::BufferingChanged(true),
            SessionEvent::BufferingChanged(false),
        ];
        assert_eq!(bus.drain(a), expected);
        assert_eq!(bus.drain(b), expected);
        assert!(bus.drain(a).is_empty());
    }

    #[test]
    fn test_topic_filter() {
        let mut bus = EventBus::new();
        let control = bus.subscribe_to(&[Topic::Control]);

        bus.publish(SessionEvent::HideMenu);
        bus.publish(SessionEvent::Kicked);

        assert_eq!(bus.drain(control), vec![SessionEvent::Kicked]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));

        bus.publish(SessionEvent::BoardCleared);
        assert!(bus.drain(a).is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut bus = EventBus::with_queue_limit(2);
        let slow = bus.subscribe();
        let media = bus.subscribe_to(&[Topic::Media]);

        bus.publish(SessionEvent::BufferingChanged(true));
        bus.publish(SessionEvent::Kicked);
        bus.publish(SessionEvent::BufferingChanged(false));

        assert_eq!(
            bus.drain(slow),
            vec![SessionEvent::Kicked, SessionEvent::BufferingChanged(false)]
        );
        assert_eq!(bus.dropped(slow), 1);
        assert_eq!(bus.drain(media).len(), 2);
        assert_eq!(bus.dropped(media), 0);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let mut bus = EventBus::new();
        bus.publish(SessionEvent::SessionExited);
        let late = bus.subscribe();
        assert!(bus.drain(late).is_empty());
    }
}
