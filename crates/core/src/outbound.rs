//! The outbound seam — sending replies back onto the bus.

use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A reply addressed the way the bus accepts sends: either into a group
/// (with an optional mention decoration) or directly to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum OutboundReply {
    Group {
        group_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mention: Option<String>,
    },
    Direct {
        user_id: String,
        content: String,
    },
}

impl OutboundReply {
    /// The reply text regardless of addressing.
    pub fn content(&self) -> &str {
        match self {
            OutboundReply::Group { content, .. } => content,
            OutboundReply::Direct { content, .. } => content,
        }
    }

    /// Where this reply is going, for logging.
    pub fn target(&self) -> &str {
        match self {
            OutboundReply::Group { group_id, .. } => group_id,
            OutboundReply::Direct { user_id, .. } => user_id,
        }
    }
}

/// Delivers replies to the external bus. Implementations are expected to be
/// at-least-once; the task runner retries on failure.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn deliver(&self, reply: OutboundReply) -> std::result::Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let reply = OutboundReply::Group {
            group_id: "g1".into(),
            content: "hello".into(),
            mention: Some("u9".into()),
        };
        assert_eq!(reply.content(), "hello");
        assert_eq!(reply.target(), "g1");
    }

    #[test]
    fn serde_shape() {
        let reply = OutboundReply::Direct {
            user_id: "u1".into(),
            content: "hi".into(),
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("\"target\":\"direct\""));
    }
}
