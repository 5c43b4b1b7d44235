//! Domain events: observable side effects of the pipeline.
//!
//! Background persistence does not report back to the request that caused
//! it, so its outcomes are published here. Subscribers (the CLI, a metrics
//! exporter, tests) receive every event and filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::MessageKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A chat was created lazily for a first question
    ChatCreated {
        chat_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A message was written to the store
    MessagePersisted {
        chat_id: String,
        message_id: String,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    },

    /// A background write failed or was dropped
    PersistenceFailed {
        chat_id: String,
        operation: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::PersistenceFailed {
            chat_id: "c1".into(),
            operation: "save_assistant_message".into(),
            error_message: "disk full".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::PersistenceFailed { chat_id, error_message, .. } => {
                assert_eq!(chat_id, "c1");
                assert_eq!(error_message, "disk full");
            }
            _ => panic!("Expected PersistenceFailed event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ChatCreated {
            chat_id: "c1".into(),
            user_id: "u1".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DomainEvent::MessagePersisted {
            chat_id: "c1".into(),
            message_id: "m1".into(),
            kind: MessageKind::Assistant,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_persisted");
        assert_eq!(json["kind"], "assistant");
    }
}
