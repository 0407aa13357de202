//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  The engine publishes here; presentation layers subscribe.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Vitals`] | Evaluated readings after every sensor update |
//! | [`Topic::Dispatch`] | Dispatch state transitions and feed faults |
//! | [`Topic::Session`] | Sign-in, sign-out and authentication failures |
//!
//! Every event published to a topic is also mirrored onto a firehose
//! channel available through [`EventBus::subscribe`].

use carewatch_types::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Evaluated sensor readings.
    Vitals,
    /// Robot dispatch transitions and data-source faults.
    Dispatch,
    /// Session lifecycle: signed in, signed out, authentication failures.
    Session,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    vitals: broadcast::Sender<Event>,
    dispatch: broadcast::Sender<Event>,
    session: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity);
        let (vitals, _) = broadcast::channel(capacity);
        let (dispatch, _) = broadcast::channel(capacity);
        let (session, _) = broadcast::channel(capacity);
        Self {
            firehose,
            vitals,
            dispatch,
            session,
        }
    }

    /// Publish `event` to the given [`Topic`] channel and the firehose.
    ///
    /// Returns the number of topic receivers that were handed the event.
    /// Having no subscribers is a normal condition and yields `0`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        // A closed firehose only means nobody is listening to everything.
        let _ = self.firehose.send(event.clone());
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Vitals => &self.vitals,
            Topic::Dispatch => &self.dispatch,
            Topic::Session => &self.session,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Lagging is logged and skipped; `None` means the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv] for draining.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carewatch_types::{DispatchCause, DispatchState, EventPayload};

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::DispatchChanged {
                state: DispatchState::Dispatched,
                cause: DispatchCause::Manual,
            },
        )
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish_to(Topic::Vitals, make_event("test")), 0);
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut sub1 = bus.subscribe_to(Topic::Dispatch);
        let mut sub2 = bus.subscribe_to(Topic::Dispatch);

        let event = make_event("carewatch-runtime::session");
        assert_eq!(bus.publish_to(Topic::Dispatch, event.clone()), 2);

        assert_eq!(sub1.recv().await.map(|e| e.id), Some(event.id));
        assert_eq!(sub2.recv().await.map(|e| e.id), Some(event.id));
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut session_sub = bus.subscribe_to(Topic::Session);

        bus.publish_to(Topic::Vitals, make_event("vitals"));

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            session_sub.recv(),
        )
        .await;
        assert!(result.is_err(), "Session subscriber must not receive a Vitals event");
    }

    #[tokio::test]
    async fn firehose_sees_every_topic() {
        let bus = EventBus::default();
        let mut all = bus.subscribe();

        let a = make_event("a");
        let b = make_event("b");
        bus.publish_to(Topic::Vitals, a.clone());
        bus.publish_to(Topic::Session, b.clone());

        assert_eq!(all.recv().await.unwrap().id, a.id);
        assert_eq!(all.recv().await.unwrap().id, b.id);
    }

    #[tokio::test]
    async fn slow_subscriber_skips_lagged_events() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Vitals);

        let mut last = None;
        for i in 0..32 {
            let event = make_event(&format!("flood-{i}"));
            last = Some(event.id);
            bus.publish_to(Topic::Vitals, event);
        }

        // The oldest events were dropped; the receiver resumes instead of failing.
        let mut seen = Vec::new();
        while let Some(event) = slow.try_recv() {
            seen.push(event.id);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last().copied(), last);
    }
}
