//! Prompt assembly.
//!
//! Every generation prompt concatenates, in order: the persona system text,
//! the enumerated style guidance, the bot identity, the serialized
//! structured context, the batch's main content, and the instructions
//! mandating a JSON-only reply in one of two shapes.

use chattermill_core::identity::BotIdentity;
use chattermill_core::processor::StructuredContext;

const REPLY_INSTRUCTIONS: &str = r#"Answer with JSON only, no prose around it, in exactly one of these two shapes:
{"messages": ["first reply", "optionally more"], "thinking": "your reasoning"}
when you want to reply, or
{"reason": "why you stay silent", "thinking": "your reasoning"}
when you deliberately do not reply. Do not wrap the JSON in code fences."#;

/// Builds generation and reformat prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
    style: Vec<String>,
    identity: BotIdentity,
}

impl PromptBuilder {
    pub fn new(persona: impl Into<String>, style: Vec<String>, identity: BotIdentity) -> Self {
        Self {
            persona: persona.into(),
            style,
            identity,
        }
    }

    /// The full generation prompt for a batch.
    pub fn build(
        &self,
        main_content: &str,
        context: &StructuredContext,
    ) -> Result<String, serde_json::Error> {
        let context_json = serde_json::to_string_pretty(context)?;

        let mut prompt = String::with_capacity(1024 + context_json.len());
        prompt.push_str(&self.persona);
        prompt.push_str("\n\n");

        if !self.style.is_empty() {
            prompt.push_str("Style guidance:\n");
            for (i, line) in self.style.iter().enumerate() {
                prompt.push_str(&format!("{}. {line}\n", i + 1));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "You are \"{}\" (id {}) in this chat.\n\n",
            self.identity.name, self.identity.id
        ));

        prompt.push_str("Conversation context:\n");
        prompt.push_str(&context_json);
        prompt.push_str("\n\nThe message to consider answering:\n");
        prompt.push_str(main_content);
        prompt.push_str("\n\n");
        prompt.push_str(REPLY_INSTRUCTIONS);

        Ok(prompt)
    }

    /// The one-shot reformat prompt issued after a parse failure: the
    /// original prompt, the malformed output, and reformat instructions.
    pub fn build_reformat(&self, original_prompt: &str, malformed: &str) -> String {
        format!(
            "{original_prompt}\n\nYour previous answer was not valid JSON:\n{malformed}\n\n\
             Reformat that answer into one of the two JSON shapes described above. \
             JSON only, nothing else."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chattermill_core::processor::{BatchSummary, StructuredContext};

    fn context() -> StructuredContext {
        StructuredContext {
            summary: BatchSummary {
                message_count: 2,
                user_count: 1,
                timespan_seconds: 4,
                has_high_priority: true,
            },
            queue_messages: vec![],
            recent_history: vec![],
        }
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(
            "You are a dry-witted regular in this chat.",
            vec!["Keep replies short.".into(), "Never use hashtags.".into()],
            BotIdentity::new("10042", Some("FingerBot".into())),
        )
    }

    #[test]
    fn prompt_contains_all_sections_in_order() {
        let prompt = builder().build("hello there", &context()).unwrap();
        let persona_at = prompt.find("dry-witted regular").unwrap();
        let style_at = prompt.find("1. Keep replies short.").unwrap();
        let identity_at = prompt.find("\"FingerBot\" (id 10042)").unwrap();
        let context_at = prompt.find("queueMessages").unwrap();
        let main_at = prompt.find("hello there").unwrap();
        let instructions_at = prompt.find("Answer with JSON only").unwrap();
        assert!(persona_at < style_at);
        assert!(style_at < identity_at);
        assert!(identity_at < context_at);
        assert!(context_at < main_at);
        assert!(main_at < instructions_at);
    }

    #[test]
    fn style_section_is_enumerated() {
        let prompt = builder().build("x", &context()).unwrap();
        assert!(prompt.contains("1. Keep replies short."));
        assert!(prompt.contains("2. Never use hashtags."));
    }

    #[test]
    fn empty_style_omits_section() {
        let builder = PromptBuilder::new("persona", vec![], BotIdentity::new("id", None));
        let prompt = builder.build("x", &context()).unwrap();
        assert!(!prompt.contains("Style guidance"));
    }

    #[test]
    fn reformat_carries_original_and_malformed() {
        let b = builder();
        let reformat = b.build_reformat("ORIGINAL PROMPT", "not-json");
        assert!(reformat.contains("ORIGINAL PROMPT"));
        assert!(reformat.contains("not-json"));
        assert!(reformat.contains("Reformat"));
    }
}
