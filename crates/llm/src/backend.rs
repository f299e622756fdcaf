//! The remote model seam and its HTTP implementation.
//!
//! The backend contract is deliberately small: a prompt string in, a text
//! completion plus a token estimate out, with rate-limit and auth failures
//! distinguishable from transient ones.

use async_trait::async_trait;
use chattermill_core::error::LlmError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A completed remote call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
}

/// The remote model. Implementations map their wire errors onto the
/// [`LlmError`] taxonomy so the client can rotate and retry correctly.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Human-readable backend name for logging.
    fn name(&self) -> &str;

    /// Send one prompt with the given credential.
    async fn complete(&self, prompt: &str, secret: &str) -> Result<Completion, LlmError>;

    /// One-shot health probe. The default sends a minimal prompt.
    async fn probe(&self, secret: &str) -> Result<(), LlmError> {
        self.complete("ping", secret).await.map(|_| ())
    }
}

/// Classify a failed HTTP exchange into the error taxonomy.
///
/// Status codes rule first; the body text is sniffed for providers that
/// hide rate limiting or key problems behind generic statuses.
pub fn classify_api_error(status: u16, body: &str) -> LlmError {
    let lowered = body.to_lowercase();
    if status == 429 || lowered.contains("rate limit") || lowered.contains("quota exceeded") {
        return LlmError::RateLimited {
            message: format!("status {status}: {}", snippet(body)),
        };
    }
    if status == 401 || status == 403 || lowered.contains("invalid key") || lowered.contains("api key")
    {
        return LlmError::CredentialInvalid {
            message: format!("status {status}: {}", snippet(body)),
        };
    }
    LlmError::Transient {
        message: format!("status {status}: {}", snippet(body)),
    }
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat completion backend.
pub struct HttpChatBackend {
    name: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatRequestMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

impl HttpChatBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            name: "openai-compat".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, secret: &str) -> Result<Completion, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatRequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(backend = %self.name, model = %self.model, prompt_len = prompt.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %snippet(&body), "Model backend returned an error");
            return Err(classify_api_error(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::Transient {
            message: format!("malformed backend response: {e}"),
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Transient {
                message: "backend returned no choices".into(),
            })?;

        // Providers that omit usage get the rough 4-chars-per-token estimate.
        let tokens_used = parsed
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| (text.len() / 4) as u32);

        Ok(Completion { text, tokens_used })
    }
}
