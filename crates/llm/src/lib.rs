//! The LLM client: prompt assembly, remote calls, structured reply parsing.
//!
//! A logical `generate` call acquires a credential from the pool, invokes
//! the backend with up to three attempts (exponential backoff, credential
//! rotation on rate-limit and auth failures), then parses the completion
//! into an [`chattermill_core::LlmDecision`]. Non-conforming output gets one
//! reformat retry, then a raw-text fallback — a logical call never fails on
//! parse alone.

pub mod backend;
pub mod client;
pub mod parse;
pub mod prompt;

pub use backend::{ChatBackend, Completion, HttpChatBackend};
pub use client::{LlmClient, RetryPolicy};
pub use prompt::PromptBuilder;
