//! The processing seam between the queue manager and the LLM pipeline.
//!
//! A flush drains a per-context queue into a [`BatchSnapshot`]; the batch
//! assembler derives a [`StructuredContext`] from it; both are handed to a
//! [`MessageProcessor`]. The structured context is serialized verbatim into
//! the model prompt, so its field names are a wire contract (camelCase).

use crate::decision::LlmDecision;
use crate::error::LlmError;
use crate::message::{FlushReason, QueuedMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An immutable snapshot of a drained per-context queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    /// The context every message in this batch shares
    pub context_id: String,

    /// The drained messages, in enqueue order
    pub messages: Vec<QueuedMessage>,

    /// Which trigger produced this batch
    pub reason: FlushReason,
}

impl BatchSnapshot {
    /// Inbound ids of every message in the batch, in order.
    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.inbound.id.clone()).collect()
    }

    /// The content the model is asked to answer: the last high-priority
    /// message if any, else the last message.
    pub fn main_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.high_priority)
            .or_else(|| self.messages.last())
            .map(|m| m.inbound.content.as_str())
            .unwrap_or("")
    }
}

/// Aggregate facts about a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub message_count: usize,
    pub user_count: usize,
    pub timespan_seconds: i64,
    pub has_high_priority: bool,
}

/// Whether a context entry was said by a user or by the bot itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Assistant,
}

/// One message as the model sees it, in the batch or in recent history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub message_id: String,
    pub content: String,
    pub sender_name: String,
    pub sender_id: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
    pub role: EntryRole,
}

/// The structured input handed to the model alongside the main content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredContext {
    pub summary: BatchSummary,
    pub queue_messages: Vec<ContextEntry>,
    pub recent_history: Vec<ContextEntry>,
}

/// The seam the queue manager calls through when a trigger fires.
///
/// Implemented by the LLM client; tests substitute scripted mocks.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Turn a batch plus its structured context into a decision.
    async fn process(
        &self,
        batch: &BatchSnapshot,
        context: &StructuredContext,
    ) -> std::result::Result<LlmDecision, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::InboundMessage;

    fn queued(content: &str, high_priority: bool) -> QueuedMessage {
        QueuedMessage::new(InboundMessage::text("u1", content), high_priority)
    }

    #[test]
    fn main_content_prefers_last_high_priority() {
        let batch = BatchSnapshot {
            context_id: "c1".into(),
            messages: vec![queued("a", false), queued("b", true), queued("c", false)],
            reason: FlushReason::Size,
        };
        assert_eq!(batch.main_content(), "b");
    }

    #[test]
    fn main_content_falls_back_to_last() {
        let batch = BatchSnapshot {
            context_id: "c1".into(),
            messages: vec![queued("a", false), queued("b", false)],
            reason: FlushReason::Silence,
        };
        assert_eq!(batch.main_content(), "b");
    }

    #[test]
    fn structured_context_uses_camel_case_wire_names() {
        let ctx = StructuredContext {
            summary: BatchSummary {
                message_count: 1,
                user_count: 1,
                timespan_seconds: 0,
                has_high_priority: false,
            },
            queue_messages: vec![ContextEntry {
                message_id: "m1".into(),
                content: "hi".into(),
                sender_name: "Alice".into(),
                sender_id: "u1".into(),
                timestamp: "2024-05-01T00:00:00+00:00".into(),
                role: EntryRole::User,
            }],
            recent_history: vec![],
        };
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("queueMessages"));
        assert!(json.contains("recentHistory"));
        assert!(json.contains("messageCount"));
        assert!(json.contains("hasHighPriority"));
        assert!(json.contains("\"role\":\"user\""));
    }
}
