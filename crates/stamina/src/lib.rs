//! Stamina — a continuous fatigue-with-inertia model.
//!
//! Replying costs stamina; recovery is suppressed by *momentum*, the
//! accumulated pressure of recent activity. Bursts therefore keep dragging
//! on stamina after they end, which rate-limits the mediator without fixed
//! cooldowns.
//!
//! The pure math lives in [`model`]; [`controller`] wraps it with a lock,
//! a background regeneration tick, level-change events, and the reply gate
//! consulted by the scheduler.

pub mod controller;
pub mod model;

pub use controller::{StaminaController, StaminaStatus};
pub use model::{StaminaParams, StaminaState};
