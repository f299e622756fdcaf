//! Inbound message domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the event bus delivers an [`InboundMessage`] → the queue manager wraps it
//! as a [`QueuedMessage`] → a trigger fires and a batch is handed to the LLM
//! pipeline with a [`FlushReason`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of inbound event this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// An ordinary chat message
    Text,
    /// An admin/command message (bypasses the queue for authorized senders)
    Command,
}

/// A single chat event received from the external bus.
///
/// Immutable after construction. The logical addressing key is the group id
/// when the message is multi-party, otherwise the conversation id, otherwise
/// the sender id — see [`InboundMessage::context_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message ID (assigned by the bus, or generated)
    pub id: String,

    /// Platform-specific sender identifier
    pub sender_id: String,

    /// Human-readable sender name (if the platform provides one)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// Conversation/session identifier, if the bus supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Group identifier for multi-party chats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    /// The text content
    pub content: String,

    /// When the bus handed us this message
    pub received_at: DateTime<Utc>,

    /// Text or command
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Create a plain text message from a private chat.
    pub fn text(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            sender_name: None,
            conversation_id: None,
            group_id: None,
            content: content.into(),
            received_at: Utc::now(),
            kind: MessageKind::Text,
        }
    }

    /// Create a plain text message addressed to a group.
    pub fn group_text(
        sender_id: impl Into<String>,
        group_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Self::text(sender_id, content)
        }
    }

    /// The logical addressing key for this message's chat stream:
    /// group id, else conversation id, else sender id.
    pub fn context_key(&self) -> &str {
        self.group_id
            .as_deref()
            .or(self.conversation_id.as_deref())
            .unwrap_or(&self.sender_id)
    }

    /// Whether this message came from a multi-party chat.
    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }
}

/// An [`InboundMessage`] after queue ingress. Never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// The original inbound message
    pub inbound: InboundMessage,

    /// True when the content mentions the bot or the kind is a command
    pub high_priority: bool,

    /// When the queue accepted this message
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(inbound: InboundMessage, high_priority: bool) -> Self {
        Self {
            inbound,
            high_priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// Which trigger policy fired a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The bot was mentioned or a command arrived
    HighPriority,
    /// The per-context silence timer elapsed
    Silence,
    /// The queue reached its size bound
    Size,
    /// The oldest queued message reached its age bound
    Age,
    /// An operator asked for it
    Manual,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlushReason::HighPriority => "high_priority",
            FlushReason::Silence => "silence",
            FlushReason::Size => "size",
            FlushReason::Age => "age",
            FlushReason::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// The outcome of a flush request. Non-processing outcomes are normal
/// results, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushOutcome {
    /// A batch was drained and handed to the LLM pipeline
    Processed,
    /// The queue was empty; nothing was done
    Empty,
    /// Another flush is already running for this context
    Busy,
    /// Stamina gating refused the batch; `dropped` counts messages discarded
    /// by the critical-level drain (zero when the queue was retained)
    StaminaInsufficient { dropped: usize },
    /// Group processing is stopped and this context is a group chat
    SkipReply,
    /// The batch went downstream but processing failed terminally; the
    /// snapshot was discarded
    Errored,
}

impl FlushOutcome {
    /// True only when a batch actually went downstream.
    pub fn processed(&self) -> bool {
        matches!(self, FlushOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_key_prefers_group() {
        let msg = InboundMessage::group_text("u1", "g9", "hi");
        assert_eq!(msg.context_key(), "g9");
        assert!(msg.is_group());
    }

    #[test]
    fn context_key_falls_back_to_conversation_then_sender() {
        let mut msg = InboundMessage::text("u1", "hi");
        assert_eq!(msg.context_key(), "u1");
        msg.conversation_id = Some("c7".into());
        assert_eq!(msg.context_key(), "c7");
    }

    #[test]
    fn flush_reason_display() {
        assert_eq!(FlushReason::HighPriority.to_string(), "high_priority");
        assert_eq!(FlushReason::Silence.to_string(), "silence");
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = InboundMessage::text("u1", "Test message");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, "Test message");
        assert_eq!(parsed.kind, MessageKind::Text);
    }

    #[test]
    fn flush_outcome_processed() {
        assert!(FlushOutcome::Processed.processed());
        assert!(!FlushOutcome::Busy.processed());
        assert!(!FlushOutcome::StaminaInsufficient { dropped: 3 }.processed());
    }
}
