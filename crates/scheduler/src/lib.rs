//! The adaptive batching scheduler.
//!
//! [`queue::QueueManager`] buffers inbound messages per conversation and
//! flushes batches when one of five triggers fires: a high-priority mention,
//! a silence window elapsing, a size bound, an age bound, or a manual
//! request. [`assembler::BatchAssembler`] turns a drained batch into the
//! structured model input and maintains the bounded per-conversation
//! history.

pub mod assembler;
pub mod queue;

pub use assembler::BatchAssembler;
pub use queue::{ContextQueueStatus, QueueManager, QueueStatus, SchedulerSettings};
