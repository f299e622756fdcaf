//! Async task domain types.
//!
//! Delivery and auxiliary side-effects are decoupled from the decision loop
//! by enqueueing tasks onto the runner; these are the shapes that travel
//! through its queue.

use crate::outbound::OutboundReply;
use crate::thought::ThoughtRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The registered task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    DeliverReply,
    RecordThought,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::DeliverReply => "deliver-reply",
            TaskKind::RecordThought => "record-thought",
        };
        write!(f, "{s}")
    }
}

/// Where a task lands in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Appended to the back
    #[default]
    Normal,
    /// Prepended to the front
    High,
}

/// The work a task carries. The payload determines the kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskPayload {
    DeliverReply(OutboundReply),
    RecordThought(ThoughtRecord),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::DeliverReply(_) => TaskKind::DeliverReply,
            TaskPayload::RecordThought(_) => TaskKind::RecordThought,
        }
    }
}

/// A unit of deferred work with bounded retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub payload: TaskPayload,
    /// How many times a handler has been invoked for this task
    pub attempts: u32,
    pub max_attempts: u32,
}

impl Task {
    pub fn new(payload: TaskPayload, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_payload() {
        let task = Task::new(
            TaskPayload::DeliverReply(OutboundReply::Direct {
                user_id: "u1".into(),
                content: "hi".into(),
            }),
            3,
        );
        assert_eq!(task.kind(), TaskKind::DeliverReply);
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn kind_display_is_kebab_case() {
        assert_eq!(TaskKind::DeliverReply.to_string(), "deliver-reply");
        assert_eq!(TaskKind::RecordThought.to_string(), "record-thought");
    }
}
