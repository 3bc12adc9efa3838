//! Typed pub/sub event bus — the sole coupling between the Store, the
//! Orchestrator, the Permission Broker, and external observers (spec §4.1).
//!
//! Grounded on `agent/loop_events.rs`'s tagged-enum event shape and on
//! `tokio::sync::broadcast`, whose bounded-ring-buffer-with-lag semantics map
//! directly onto the spec's "drop oldest, don't block" overflow contract: a
//! lagging receiver's next `recv()` returns `Lagged(n)`, which we catch here
//! and turn into a synthesized [`Event::BufferOverflow`] rather than letting
//! it propagate as an error subscribers have to special-case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default bounded buffer depth per subscriber (spec §4.1 example value).
pub const DEFAULT_BUFFER: usize = 64;

/// One of the three event kinds spec §4.1 names for mutation of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// Payload carried by a bus event, matching the kinds spec §6 enumerates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Event {
    Session {
        kind: EventKind,
        session_id: String,
        payload: serde_json::Value,
    },
    Message {
        kind: EventKind,
        session_id: String,
        message_id: String,
        payload: serde_json::Value,
    },
    PermissionCreated {
        request_id: String,
        payload: serde_json::Value,
    },
    PermissionNotified {
        request_id: String,
        tool_call_id: String,
        granted: bool,
        denied: bool,
    },
    Agent {
        session_id: String,
        event_type: String,
        progress: Option<String>,
        done: bool,
        error: Option<String>,
    },
    /// Synthesized when a subscriber's buffer overflowed and the bus had to
    /// drop the oldest queued events for it. Never raised as an error —
    /// subscribers see it as a normal event, per spec §7 ("the event bus
    /// never surfaces errors as exceptions").
    BufferOverflow {
        subscriber_lag: u64,
    },
}

impl Event {
    pub fn timestamp() -> DateTime<Utc> {
        Utc::now()
    }
}

/// A bus subscription. Dropping it (or calling [`Subscription::cancel`])
/// closes the channel on the next send.
pub struct Subscription {
    inner: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event, transparently turning a `Lagged` error into
    /// a synthesized [`Event::BufferOverflow`] instead of propagating it.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Event::BufferOverflow { subscriber_lag: n })
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving further events. Events published after this point are
    /// simply never delivered to this subscription.
    pub fn cancel(self) {
        drop(self);
    }
}

/// Central event bus. One broadcast channel shared across all topics —
/// subscribers that only care about a subset filter client-side, matching
/// the single-broker-per-event-type shape spec §4.1 describes scaled down
/// to one process-wide channel (cheaper than N brokers, same observable
/// ordering and overflow behavior).
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Subscribers that registered before this call
    /// receive it; a subscriber whose buffer is full has its oldest queued
    /// event dropped by `broadcast` internally and surfaces that as a
    /// `BufferOverflow` the next time it receives, per spec §4.1/§8
    /// property 8 ("full buffers lose oldest, never newest").
    pub fn publish(&self, event: Event) {
        // No active subscribers is not an error: the bus just has nothing
        // to deliver to.
        let _ = self.sender.send(event);
    }

    /// Subscribe. Only events published after this call are visible to the
    /// returned subscription (spec §4.1: "Subscribers receive events
    /// published after subscription").
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            inner: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(Event::Session {
            kind: EventKind::Created,
            session_id: "s1".into(),
            payload: serde_json::json!({}),
        });
        let event = sub.recv().await.expect("event");
        assert!(matches!(event, Event::Session { .. }));
    }

    #[tokio::test]
    async fn events_published_before_subscribe_are_not_delivered() {
        let bus = EventBus::new();
        bus.publish(Event::Session {
            kind: EventKind::Created,
            session_id: "s1".into(),
            payload: serde_json::json!({}),
        });
        let mut sub = bus.subscribe();
        bus.publish(Event::Session {
            kind: EventKind::Updated,
            session_id: "s1".into(),
            payload: serde_json::json!({}),
        });
        let event = sub.recv().await.expect("event");
        assert!(matches!(
            event,
            Event::Session {
                kind: EventKind::Updated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn overflow_surfaces_as_buffer_overflow_event_not_error() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(Event::Session {
                kind: EventKind::Updated,
                session_id: format!("s{i}"),
                payload: serde_json::json!({}),
            });
        }
        let event = sub.recv().await.expect("event");
        assert!(matches!(event, Event::BufferOverflow { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = EventBus::new();
        let mut sub_a = bus.subscribe();
        let mut sub_b = bus.subscribe();
        bus.publish(Event::PermissionCreated {
            request_id: "r1".into(),
            payload: serde_json::json!({}),
        });
        assert!(sub_a.recv().await.is_some());
        assert!(sub_b.recv().await.is_some());
    }
}
