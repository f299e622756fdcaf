//! The parsed outcome of an LLM call.
//!
//! The model is instructed to answer with JSON in one of two shapes:
//! `{"messages": [..], "thinking": ".."}` (reply) or
//! `{"reason": "..", "thinking": ".."}` (deliberate silence). The client
//! projects either shape into a [`DecisionAction`]; the envelope adds token
//! accounting and the inbound ids the decision answers.

use serde::{Deserialize, Serialize};

/// What the model decided to do with a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionAction {
    /// Send one or more reply messages, in order.
    Reply {
        /// Non-empty sequence of reply strings
        messages: Vec<String>,
        /// The model's reasoning trace (logged, never sent to chat)
        thinking: String,
        /// Sender ids the model asked to mention in the reply
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<String>,
    },
    /// Deliberately stay silent.
    NoReply {
        /// Why the model chose not to answer
        reason: String,
        /// The model's reasoning trace
        thinking: String,
    },
}

/// A [`DecisionAction`] plus call accounting, as returned by the LLM client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmDecision {
    /// Reply or deliberate silence
    pub action: DecisionAction,

    /// Tokens consumed by all remote calls behind this decision
    pub tokens_used: u32,

    /// Inbound message ids this decision answers. Left empty when the
    /// model did not name any; the flush event then supplies the batch ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlated_ids: Vec<String>,
}

impl LlmDecision {
    /// Marker distinguishing reply from no-reply, carried to the correlator.
    pub fn is_reply(&self) -> bool {
        matches!(self.action, DecisionAction::Reply { .. })
    }

    /// The reasoning trace regardless of shape.
    pub fn thinking(&self) -> &str {
        match &self.action {
            DecisionAction::Reply { thinking, .. } => thinking,
            DecisionAction::NoReply { thinking, .. } => thinking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_marker() {
        let d = LlmDecision {
            action: DecisionAction::Reply {
                messages: vec!["hi".into()],
                thinking: "greeting".into(),
                mentions: vec![],
            },
            tokens_used: 12,
            correlated_ids: vec![],
        };
        assert!(d.is_reply());
        assert_eq!(d.thinking(), "greeting");
    }

    #[test]
    fn no_reply_marker() {
        let d = LlmDecision {
            action: DecisionAction::NoReply {
                reason: "not addressed to me".into(),
                thinking: "bystander chatter".into(),
            },
            tokens_used: 3,
            correlated_ids: vec!["m1".into()],
        };
        assert!(!d.is_reply());
        assert_eq!(d.thinking(), "bystander chatter");
    }

    #[test]
    fn action_serde_tagging() {
        let json = serde_json::to_string(&DecisionAction::NoReply {
            reason: "quiet".into(),
            thinking: "t".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"no_reply\""));
        let parsed: DecisionAction = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, DecisionAction::NoReply { .. }));
    }
}
