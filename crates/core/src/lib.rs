//! # Chattermill Core
//!
//! Domain types, traits, and error definitions for the chattermill chat
//! mediator. This crate has **zero heavyweight dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam between subsystems is defined as a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)
//!
//! The event bus in [`event`] is the one-way listener seam that keeps the
//! queue manager decoupled from the correlator and the orchestrator.

pub mod decision;
pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod outbound;
pub mod processor;
pub mod stamina;
pub mod task;
pub mod thought;

// Re-export key types at crate root for ergonomics
pub use decision::{DecisionAction, LlmDecision};
pub use error::{DeliveryError, Error, LlmError, Result, TaskError, ThoughtLogError};
pub use event::{AgentEvent, DropCause, EventBus};
pub use identity::BotIdentity;
pub use message::{FlushOutcome, FlushReason, InboundMessage, MessageKind, QueuedMessage};
pub use outbound::{OutboundReply, OutboundSink};
pub use processor::{
    BatchSnapshot, BatchSummary, ContextEntry, EntryRole, MessageProcessor, StructuredContext,
};
pub use stamina::StaminaLevel;
pub use task::{Task, TaskKind, TaskPayload, TaskPriority};
pub use thought::{ThoughtRecord, ThoughtSink};
