//! Bot identity — who the mediator is on the bus.

use serde::{Deserialize, Serialize};

/// The mediator's identity: an opaque bus id plus a display name.
///
/// The name drives high-priority mention detection; the id drives
/// assistant-role attribution when assembling conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotIdentity {
    /// Opaque identifier on the bus (e.g. a numeric account id)
    pub id: String,

    /// Display name users mention; defaults to the id
    pub name: String,
}

impl BotIdentity {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        let id = id.into();
        let name = name.unwrap_or_else(|| id.clone());
        Self { id, name }
    }

    /// Whether `sender_id` is the bot itself (case-insensitive).
    pub fn is_self(&self, sender_id: &str) -> bool {
        self.id.eq_ignore_ascii_case(sender_id)
    }

    /// Whether `content` mentions the bot: `@name` or the bare name,
    /// case-insensitive.
    pub fn mentioned_in(&self, content: &str) -> bool {
        if self.name.is_empty() {
            return false;
        }
        let content = content.to_lowercase();
        let name = self.name.to_lowercase();
        content.contains(&format!("@{name}")) || content.contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_defaults_to_id() {
        let identity = BotIdentity::new("10042", None);
        assert_eq!(identity.name, "10042");
    }

    #[test]
    fn mention_detection_is_case_insensitive() {
        let identity = BotIdentity::new("10042", Some("FingerBot".into()));
        assert!(identity.mentioned_in("@FingerBot hi"));
        assert!(identity.mentioned_in("hey fingerbot, you there?"));
        assert!(identity.mentioned_in("HEY FINGERBOT"));
        assert!(!identity.mentioned_in("talking about someone else"));
    }

    #[test]
    fn self_detection_is_case_insensitive() {
        let identity = BotIdentity::new("BotAcct", None);
        assert!(identity.is_self("botacct"));
        assert!(!identity.is_self("someone"));
    }
}
