//! The batch assembler — from a drained batch to structured model input.
//!
//! Also the keeper of the in-memory conversation history: a bounded ring of
//! the most recent entries per conversation, fed by every assembled batch
//! and by the replies the mediator commits back.

use chattermill_core::identity::BotIdentity;
use chattermill_core::message::QueuedMessage;
use chattermill_core::processor::{BatchSnapshot, BatchSummary, ContextEntry, EntryRole, StructuredContext};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Most recent entries retained per conversation.
const HISTORY_LIMIT: usize = 100;

/// Prior entries surfaced to the model per batch.
const RECENT_LIMIT: usize = 50;

/// Builds [`StructuredContext`] values and owns the history rings.
pub struct BatchAssembler {
    identity: BotIdentity,
    history: Mutex<HashMap<String, VecDeque<ContextEntry>>>,
}

impl BatchAssembler {
    pub fn new(identity: BotIdentity) -> Self {
        Self {
            identity,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Build the structured context for a batch and commit the batch's
    /// messages into the conversation history.
    ///
    /// `recentHistory` contains only entries that precede this batch.
    pub fn assemble(&self, batch: &BatchSnapshot) -> StructuredContext {
        let entries: Vec<ContextEntry> = batch
            .messages
            .iter()
            .map(|m| self.entry_for(m))
            .collect();

        let summary = self.summarize(&batch.messages);

        let mut history = self.history.lock().unwrap();
        let ring = history.entry(batch.context_id.clone()).or_default();

        let recent_history: Vec<ContextEntry> = ring
            .iter()
            .rev()
            .take(RECENT_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        for entry in &entries {
            push_bounded(ring, entry.clone());
        }

        StructuredContext {
            summary,
            queue_messages: entries,
            recent_history,
        }
    }

    /// Commit a reply the mediator chose to send as an assistant entry.
    pub fn commit_reply(&self, context_id: &str, content: &str) {
        let mut history = self.history.lock().unwrap();
        let ring = history.entry(context_id.to_string()).or_default();
        push_bounded(
            ring,
            ContextEntry {
                message_id: Uuid::new_v4().to_string(),
                content: content.to_string(),
                sender_name: self.identity.name.clone(),
                sender_id: self.identity.id.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                role: EntryRole::Assistant,
            },
        );
    }

    /// Number of history entries held for a conversation.
    pub fn history_len(&self, context_id: &str) -> usize {
        self.history
            .lock()
            .unwrap()
            .get(context_id)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    fn entry_for(&self, m: &QueuedMessage) -> ContextEntry {
        let role = if self.identity.is_self(&m.inbound.sender_id) {
            EntryRole::Assistant
        } else {
            EntryRole::User
        };
        ContextEntry {
            message_id: m.inbound.id.clone(),
            content: m.inbound.content.clone(),
            sender_name: m
                .inbound
                .sender_name
                .clone()
                .unwrap_or_else(|| m.inbound.sender_id.clone()),
            sender_id: m.inbound.sender_id.clone(),
            timestamp: m.inbound.received_at.to_rfc3339(),
            role,
        }
    }

    fn summarize(&self, messages: &[QueuedMessage]) -> BatchSummary {
        let user_count = messages
            .iter()
            .map(|m| m.inbound.sender_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let timespan_seconds = match (messages.first(), messages.last()) {
            (Some(first), Some(last)) => (last.inbound.received_at - first.inbound.received_at)
                .num_seconds()
                .max(0),
            _ => 0,
        };
        BatchSummary {
            message_count: messages.len(),
            user_count,
            timespan_seconds,
            has_high_priority: messages.iter().any(|m| m.high_priority),
        }
    }
}

fn push_bounded(ring: &mut VecDeque<ContextEntry>, entry: ContextEntry) {
    ring.push_back(entry);
    while ring.len() > HISTORY_LIMIT {
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chattermill_core::message::{FlushReason, InboundMessage};

    fn assembler() -> BatchAssembler {
        BatchAssembler::new(BotIdentity::new("10042", Some("FingerBot".into())))
    }

    fn batch(context: &str, messages: Vec<QueuedMessage>) -> BatchSnapshot {
        BatchSnapshot {
            context_id: context.into(),
            messages,
            reason: FlushReason::Silence,
        }
    }

    fn from(sender: &str, content: &str) -> QueuedMessage {
        QueuedMessage::new(InboundMessage::text(sender, content), false)
    }

    #[test]
    fn summary_counts_distinct_users() {
        let a = assembler();
        let ctx = a.assemble(&batch(
            "c1",
            vec![from("u1", "a"), from("u2", "b"), from("u1", "c")],
        ));
        assert_eq!(ctx.summary.message_count, 3);
        assert_eq!(ctx.summary.user_count, 2);
        assert!(!ctx.summary.has_high_priority);
    }

    #[test]
    fn bot_messages_get_assistant_role() {
        let a = assembler();
        let ctx = a.assemble(&batch("c1", vec![from("u1", "hi"), from("10042", "hello")]));
        assert_eq!(ctx.queue_messages[0].role, EntryRole::User);
        assert_eq!(ctx.queue_messages[1].role, EntryRole::Assistant);
    }

    #[test]
    fn sender_name_falls_back_to_id() {
        let a = assembler();
        let ctx = a.assemble(&batch("c1", vec![from("u1", "hi")]));
        assert_eq!(ctx.queue_messages[0].sender_name, "u1");
    }

    #[test]
    fn recent_history_excludes_current_batch() {
        let a = assembler();
        let first = a.assemble(&batch("c1", vec![from("u1", "earlier")]));
        assert!(first.recent_history.is_empty());

        let second = a.assemble(&batch("c1", vec![from("u1", "later")]));
        assert_eq!(second.recent_history.len(), 1);
        assert_eq!(second.recent_history[0].content, "earlier");
    }

    #[test]
    fn history_is_per_conversation() {
        let a = assembler();
        a.assemble(&batch("c1", vec![from("u1", "in c1")]));
        let other = a.assemble(&batch("c2", vec![from("u1", "in c2")]));
        assert!(other.recent_history.is_empty());
    }

    #[test]
    fn committed_replies_appear_in_later_history() {
        let a = assembler();
        a.assemble(&batch("c1", vec![from("u1", "question")]));
        a.commit_reply("c1", "answer");

        let next = a.assemble(&batch("c1", vec![from("u1", "follow-up")]));
        assert_eq!(next.recent_history.len(), 2);
        let reply = &next.recent_history[1];
        assert_eq!(reply.content, "answer");
        assert_eq!(reply.role, EntryRole::Assistant);
        assert_eq!(reply.sender_id, "10042");
    }

    #[test]
    fn history_ring_is_bounded() {
        let a = assembler();
        for i in 0..130 {
            a.assemble(&batch("c1", vec![from("u1", &format!("m{i}"))]));
        }
        assert_eq!(a.history_len("c1"), HISTORY_LIMIT);
    }

    #[test]
    fn recent_history_is_capped_at_fifty_ascending() {
        let a = assembler();
        for i in 0..80 {
            a.assemble(&batch("c1", vec![from("u1", &format!("m{i}"))]));
        }
        let ctx = a.assemble(&batch("c1", vec![from("u1", "now")]));
        assert_eq!(ctx.recent_history.len(), RECENT_LIMIT);
        // Ascending by time: the window ends at the newest prior message.
        assert_eq!(ctx.recent_history.first().unwrap().content, "m30");
        assert_eq!(ctx.recent_history.last().unwrap().content, "m79");
    }

    #[test]
    fn timespan_uses_first_and_last() {
        let a = assembler();
        let mut m1 = from("u1", "a");
        let mut m2 = from("u1", "b");
        m1.inbound.received_at = chrono::Utc::now() - chrono::Duration::seconds(12);
        m2.inbound.received_at = chrono::Utc::now();
        let ctx = a.assemble(&batch("c1", vec![m1, m2]));
        assert!(ctx.summary.timespan_seconds >= 11);
    }
}
