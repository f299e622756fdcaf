//! Structured reply parsing.
//!
//! Models were told "JSON only" but routinely wrap output in code fences or
//! drift from the schema. Parsing strips fences, decodes either of the two
//! accepted shapes, and rejects everything else as a parse error — the
//! client decides what to do about that.

use chattermill_core::decision::DecisionAction;
use chattermill_core::error::LlmError;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDecision {
    Reply {
        messages: Vec<String>,
        thinking: String,
        #[serde(default)]
        mentions: Vec<String>,
    },
    NoReply {
        reason: String,
        thinking: String,
    },
}

/// Parse a completion into a decision action.
pub fn parse_decision(raw: &str) -> Result<DecisionAction, LlmError> {
    let cleaned = strip_code_fences(raw);
    let decoded: RawDecision =
        serde_json::from_str(cleaned).map_err(|e| LlmError::Parse {
            message: format!("{e}: {}", head(cleaned)),
        })?;

    match decoded {
        RawDecision::Reply {
            messages,
            thinking,
            mentions,
        } => {
            if messages.is_empty() {
                return Err(LlmError::Parse {
                    message: "reply shape with empty messages".into(),
                });
            }
            Ok(DecisionAction::Reply {
                messages,
                thinking,
                mentions,
            })
        }
        RawDecision::NoReply { reason, thinking } => Ok(DecisionAction::NoReply { reason, thinking }),
    }
}

/// Remove a leading/trailing code fence pair, tolerating a language tag and
/// surrounding whitespace. Text without fences passes through untouched.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line if present ("```json\n...").
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn head(s: &str) -> &str {
    let end = s
        .char_indices()
        .nth(80)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reply_shape() {
        let action =
            parse_decision(r#"{"messages": ["hi", "again"], "thinking": "friendly"}"#).unwrap();
        match action {
            DecisionAction::Reply {
                messages,
                thinking,
                mentions,
            } => {
                assert_eq!(messages, vec!["hi", "again"]);
                assert_eq!(thinking, "friendly");
                assert!(mentions.is_empty());
            }
            other => panic!("Expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn parses_no_reply_shape() {
        let action =
            parse_decision(r#"{"reason": "not my conversation", "thinking": "lurking"}"#).unwrap();
        assert!(matches!(action, DecisionAction::NoReply { .. }));
    }

    #[test]
    fn parses_mentions_when_present() {
        let action = parse_decision(
            r#"{"messages": ["welcome"], "thinking": "t", "mentions": ["u7"]}"#,
        )
        .unwrap();
        match action {
            DecisionAction::Reply { mentions, .. } => assert_eq!(mentions, vec!["u7"]),
            other => panic!("Expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn strips_json_fences() {
        let fenced = "```json\n{\"reason\": \"r\", \"thinking\": \"t\"}\n```";
        assert!(parse_decision(fenced).is_ok());
    }

    #[test]
    fn strips_bare_fences_and_whitespace() {
        let fenced = "  ```\n{\"messages\": [\"x\"], \"thinking\": \"t\"}\n```  ";
        assert!(parse_decision(fenced).is_ok());
    }

    #[test]
    fn unfenced_text_passes_through() {
        assert_eq!(strip_code_fences("  plain "), "plain");
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_decision("not-json"),
            Err(LlmError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_unknown_shape() {
        assert!(matches!(
            parse_decision(r#"{"text": "wrong schema"}"#),
            Err(LlmError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_empty_messages() {
        assert!(matches!(
            parse_decision(r#"{"messages": [], "thinking": "t"}"#),
            Err(LlmError::Parse { .. })
        ));
    }
}
