//! The retrying LLM client.

use crate::backend::{ChatBackend, Completion};
use crate::parse::parse_decision;
use crate::prompt::PromptBuilder;
use async_trait::async_trait;
use chattermill_core::decision::{DecisionAction, LlmDecision};
use chattermill_core::error::LlmError;
use chattermill_core::processor::{BatchSnapshot, MessageProcessor, StructuredContext};
use chattermill_credentials::{CallOutcome, CredentialPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry knobs for one logical call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`:
    /// `min(base · 2^(attempt−1) + jitter[0,1s), cap)`.
    ///
    /// The jitter is derived from the wall clock's sub-second fraction —
    /// uniform enough to de-synchronize peers without pulling in an RNG.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(1u32 << exp);
        let jitter = Duration::from_millis(u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_millis())
                .unwrap_or(0),
        ));
        (base + jitter).min(self.max_delay)
    }
}

/// Generates decisions: credential acquisition, bounded retries with
/// rotation, parse with one reformat retry and a raw-text fallback.
pub struct LlmClient {
    backend: Arc<dyn ChatBackend>,
    pool: Arc<CredentialPool>,
    prompt: PromptBuilder,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        pool: Arc<CredentialPool>,
        prompt: PromptBuilder,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            pool,
            prompt,
            retry,
        }
    }

    /// One-shot health probe using the current credential.
    pub async fn probe(&self) -> Result<(), LlmError> {
        let lease = self.pool.acquire().await;
        let result = self.backend.probe(&lease.secret).await;
        match &result {
            Ok(()) => self.pool.report_outcome(lease.slot, CallOutcome::Success).await,
            Err(e) => self.pool.report_outcome(lease.slot, e.into()).await,
        }
        result
    }

    /// Produce a decision for a batch's main content and structured context.
    pub async fn generate(
        &self,
        main_content: &str,
        context: &StructuredContext,
    ) -> Result<LlmDecision, LlmError> {
        let prompt = self.prompt.build(main_content, context).map_err(|e| {
            LlmError::Parse {
                message: format!("context serialization failed: {e}"),
            }
        })?;

        let completion = self.call_with_retry(&prompt).await?;
        let mut tokens_used = completion.tokens_used;

        let action = match parse_decision(&completion.text) {
            Ok(action) => action,
            Err(parse_err) => {
                // One reformat attempt, then fall back to the raw text.
                debug!(error = %parse_err, "Completion did not parse; requesting reformat");
                let reformat_prompt = self.prompt.build_reformat(&prompt, &completion.text);
                match self.call_with_retry(&reformat_prompt).await {
                    Ok(second) => {
                        tokens_used += second.tokens_used;
                        match parse_decision(&second.text) {
                            Ok(action) => action,
                            Err(e) => {
                                warn!(error = %e, "Reformat also failed; using raw text fallback");
                                raw_text_fallback(&completion.text)
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Reformat call failed; using raw text fallback");
                        raw_text_fallback(&completion.text)
                    }
                }
            }
        };

        Ok(LlmDecision {
            action,
            tokens_used,
            correlated_ids: Vec::new(),
        })
    }

    /// Call the backend with up to `max_attempts` attempts, reporting each
    /// outcome to the pool and rotating on rate-limit and auth failures.
    async fn call_with_retry(&self, prompt: &str) -> Result<Completion, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let lease = self.pool.acquire().await;
            debug!(
                backend = self.backend.name(),
                attempt,
                max = self.retry.max_attempts,
                slot = lease.slot,
                "Calling model backend"
            );

            match self.backend.complete(prompt, &lease.secret).await {
                Ok(completion) => {
                    self.pool
                        .report_outcome(lease.slot, CallOutcome::Success)
                        .await;
                    return Ok(completion);
                }
                Err(err) => {
                    self.pool.report_outcome(lease.slot, (&err).into()).await;
                    if err.should_rotate() {
                        info!(slot = lease.slot, error = %err, "Rotating credential after failure");
                        self.pool.advance().await;
                    }

                    if attempt >= self.retry.max_attempts {
                        warn!(attempts = attempt, error = %err, "Model call exhausted retries");
                        return Err(LlmError::Exhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }

                    let delay = self.retry.delay_after(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// The last-resort projection: treat the whole completion as a single reply.
fn raw_text_fallback(text: &str) -> DecisionAction {
    DecisionAction::Reply {
        messages: vec![text.to_string()],
        thinking: "format fallback".into(),
        mentions: Vec::new(),
    }
}

#[async_trait]
impl MessageProcessor for LlmClient {
    async fn process(
        &self,
        batch: &BatchSnapshot,
        context: &StructuredContext,
    ) -> Result<LlmDecision, LlmError> {
        self.generate(batch.main_content(), context).await
    }
}
