//! Domain event system — decoupled communication between bounded contexts.
//!
//! The queue manager publishes flush results here instead of holding a
//! reference to the correlator or the orchestrator; both subscribe and
//! filter for what they care about. This is what breaks the
//! orchestrator ↔ correlator ↔ queue reference cycle.

use crate::decision::LlmDecision;
use crate::message::FlushReason;
use crate::stamina::StaminaLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why queued messages were discarded without processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropCause {
    /// Stamina fell below the critical threshold and the drain policy fired
    CriticalStamina,
    /// An operator cleared the queues
    Cleared,
    /// Group processing is stopped
    GroupDisabled,
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// A new message passed ingress
    MessageReceived {
        context_id: String,
        sender_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A batch was processed; carries the decision and the batch's inbound ids
    QueueFlushed {
        context_id: String,
        reason: FlushReason,
        decision: LlmDecision,
        batch_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A flush failed terminally; the batch was discarded
    QueueError {
        context_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Queued messages were discarded without processing
    MessagesDropped {
        context_id: String,
        count: usize,
        cause: DropCause,
        timestamp: DateTime<Utc>,
    },

    /// The stamina level label changed
    StaminaLevelChanged {
        from: StaminaLevel,
        to: StaminaLevel,
        current: f64,
        timestamp: DateTime<Utc>,
    },

    /// A credential crossed the failure threshold and was blocked
    CredentialBlocked {
        slot: usize,
        timestamp: DateTime<Utc>,
    },

    /// A blocked credential came back (sweep or daily reset)
    CredentialRecovered {
        slot: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing
/// never blocks and never fails; slow subscribers may observe `Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
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
    use crate::decision::DecisionAction;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AgentEvent::QueueFlushed {
            context_id: "c1".into(),
            reason: FlushReason::Silence,
            decision: LlmDecision {
                action: DecisionAction::NoReply {
                    reason: "quiet".into(),
                    thinking: "t".into(),
                },
                tokens_used: 1,
                correlated_ids: vec![],
            },
            batch_ids: vec!["m1".into()],
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::QueueFlushed {
                context_id,
                reason,
                batch_ids,
                ..
            } => {
                assert_eq!(context_id, "c1");
                assert_eq!(*reason, FlushReason::Silence);
                assert_eq!(batch_ids, &["m1".to_string()]);
            }
            other => panic!("Expected QueueFlushed, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::MessagesDropped {
            context_id: "c1".into(),
            count: 2,
            cause: DropCause::Cleared,
            timestamp: Utc::now(),
        });
    }
}
