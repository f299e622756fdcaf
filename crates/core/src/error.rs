//! Error types for the chattermill domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum; recoverable conditions (queue busy, stamina
//! gating) are modeled as normal results, not errors — see
//! [`crate::message::FlushOutcome`].

use thiserror::Error;

/// The top-level error type for all chattermill operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Thought log error: {0}")]
    ThoughtLog(#[from] ThoughtLogError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the remote LLM call path.
///
/// Taxonomy: `RateLimited` and `CredentialInvalid` rotate the credential;
/// `Transient` is retried with backoff without rotating; `Parse` triggers
/// the one-shot reformat retry and then the raw-text fallback.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Rate limited by the model backend: {message}")]
    RateLimited { message: String },

    #[error("Credential rejected by the model backend: {message}")]
    CredentialInvalid { message: String },

    #[error("Transient backend failure: {message}")]
    Transient { message: String },

    #[error("Model returned non-conforming text: {message}")]
    Parse { message: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl LlmError {
    /// Whether the credential should be advanced before the next attempt.
    pub fn should_rotate(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::CredentialInvalid { .. }
        )
    }

    /// Whether this failure counts toward the credential block window.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }
}

/// Failures sending a reply back onto the bus.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Send failed to {target}: {reason}")]
    SendFailed { target: String, reason: String },

    #[error("Outbound bus connection lost: {0}")]
    ConnectionLost(String),
}

/// Failures of the async task runner.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("No handler registered for task kind '{0}'")]
    NoHandler(String),

    #[error("Task '{kind}' failed after {attempts} attempts: {last}")]
    Terminal {
        kind: String,
        attempts: u32,
        last: String,
    },

    #[error("Task runner is shutting down")]
    ShuttingDown,

    #[error("Task result channel dropped")]
    ResultDropped,
}

/// Failures appending to the thought log.
#[derive(Debug, Error)]
pub enum ThoughtLogError {
    #[error("Thought log I/O failed: {0}")]
    Io(String),

    #[error("Thought record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
