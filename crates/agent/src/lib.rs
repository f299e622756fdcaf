//! The chattermill orchestrator crate.
//!
//! [`orchestrator::Orchestrator`] owns every core component, routes inbound
//! bus events, serves the admin control surface, and drives startup and
//! shutdown. [`thought_log::FileThoughtSink`] is the NDJSON thought sink
//! handed to the dispatcher.

pub mod admin;
pub mod observer;
pub mod orchestrator;
pub mod thought_log;

pub use admin::AdminCommand;
pub use orchestrator::{AgentStatus, Orchestrator};
pub use thought_log::FileThoughtSink;
