//! Turn event fan-out.
//!
//! The orchestrator publishes through [`EventSink`]. [`EventBus`] is the
//! stock sink: every published [`TurnEvent`] is serialized once and sent on
//! a tokio broadcast channel under `turn:event:{session_id}`, so any number
//! of front ends can follow the same turn.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agents::event::TurnEvent;

/// Slow subscribers lag (and miss events) once this many are buffered.
const CAPACITY: usize = 1024;

/// Destination for events produced while a turn runs.
pub trait EventSink: Send + Sync {
    fn publish(&self, session_id: &str, event: TurnEvent);
}

/// Event type under which a session's turn events are broadcast.
pub fn turn_event_type(session_id: &str) -> String {
    format!("turn:event:{session_id}")
}

/// One serialized event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    /// Decode the payload if this event belongs to `session_id`.
    pub fn turn_event(&self, session_id: &str) -> Option<TurnEvent> {
        if self.event_type != turn_event_type(session_id) {
            return None;
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|err| log::debug!("Undecodable turn event: {}", err))
            .ok()
    }
}

pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    /// Serialize `payload` and send it to current subscribers.
    ///
    /// Returns how many subscribers got it; with none the event is dropped.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("Failed to serialize {} payload: {}", event_type, err);
                return 0;
            }
        };
        self.sender
            .send(BroadcastEvent {
                event_type: event_type.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn publish(&self, session_id: &str, event: TurnEvent) {
        self.emit(&turn_event_type(session_id), &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::event::DoneReason;
    use crate::agents::tools::ToolOperation;
    use std::sync::Arc;

    fn text(s: &str) -> TurnEvent {
        TurnEvent::TextDelta {
            text: s.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_keys_by_session() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish("sess-1", text("Hi"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "turn:event:sess-1");
        assert_eq!(event.payload["kind"], "textDelta");
        assert_eq!(event.payload["text"], "Hi");
    }

    #[tokio::test]
    async fn turn_event_filters_other_sessions() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish("other", text("not mine"));
        bus.publish(
            "mine",
            TurnEvent::Done {
                reason: DoneReason::Cancelled,
            },
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.turn_event("mine"), None);
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second.turn_event("mine"),
            Some(TurnEvent::Done {
                reason: DoneReason::Cancelled
            })
        );
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_turn_in_order() {
        let bus = Arc::new(EventBus::new());
        let sink: Arc<dyn EventSink> = bus.clone();
        let mut terminal = bus.subscribe();
        let mut bridge = bus.subscribe();

        sink.publish("s", text("a"));
        sink.publish(
            "s",
            TurnEvent::ArtifactCreated {
                path: "src/main.rs".to_string(),
                operation: ToolOperation::Edit,
            },
        );
        sink.publish("s", text("b"));

        for rx in [&mut terminal, &mut bridge] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(rx.recv().await.unwrap().turn_event("s").unwrap());
            }
            assert_eq!(seen[0], text("a"));
            assert!(matches!(seen[1], TurnEvent::ArtifactCreated { .. }));
            assert_eq!(seen[2], text("b"));
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_skipped() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(&turn_event_type("s"), &serde_json::json!({"kind": "somethingNew"}));

        assert_eq!(rx.recv().await.unwrap().turn_event("s"), None);
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.publish("s", text("dropped"));
        assert_eq!(bus.emit(&turn_event_type("s"), &text("dropped")), 0);
    }

    #[tokio::test]
    async fn late_subscriber_starts_at_the_present() {
        let bus = EventBus::new();
        let _early = bus.subscribe();
        bus.publish("s", text("before"));

        let mut late = bus.subscribe();
        bus.publish("s", text("after"));
        assert_eq!(late.recv().await.unwrap().turn_event("s"), Some(text("after")));
    }
}
