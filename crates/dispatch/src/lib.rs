//! Dispatch — what happens after a decision.
//!
//! [`runner::TaskRunner`] is a process-wide bounded FIFO queue with priority
//! insertion and per-task retry; one task is in flight at a time, so replies
//! leave in the order the model produced them.
//!
//! [`correlator::Correlator`] listens for flush events, maps each decision
//! back to the inbound events it answers, and enqueues delivery and
//! thought-recording tasks onto the runner.

pub mod correlator;
pub mod handlers;
pub mod runner;

pub use correlator::{Correlator, CorrelatorStatus};
pub use handlers::{DeliverReplyHandler, RecordThoughtHandler};
pub use runner::{TaskHandler, TaskRunner};
