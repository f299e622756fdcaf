//! The event observer — structured logging for everything on the bus.
//!
//! Purely observational: it subscribes like any other listener and turns
//! domain events into log lines for the external observability surface.
//! No behavioral branch anywhere depends on it.

use chattermill_core::event::{AgentEvent, EventBus};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Log one domain event with structured fields.
pub fn log_event(event: &AgentEvent) {
    match event {
        AgentEvent::MessageReceived {
            context_id,
            sender_id,
            content_preview,
            ..
        } => {
            debug!(
                context = %context_id,
                sender = %sender_id,
                preview = %content_preview,
                "event: message received"
            );
        }
        AgentEvent::QueueFlushed {
            context_id,
            reason,
            decision,
            batch_ids,
            ..
        } => {
            info!(
                context = %context_id,
                %reason,
                batch = batch_ids.len(),
                replied = decision.is_reply(),
                tokens = decision.tokens_used,
                "event: queue flushed"
            );
        }
        AgentEvent::QueueError {
            context_id, error, ..
        } => {
            warn!(context = %context_id, error = %error, "event: queue error");
        }
        AgentEvent::MessagesDropped {
            context_id,
            count,
            cause,
            ..
        } => {
            warn!(context = %context_id, count, ?cause, "event: messages dropped");
        }
        AgentEvent::StaminaLevelChanged {
            from, to, current, ..
        } => {
            info!(%from, %to, current, "event: stamina level changed");
        }
        AgentEvent::CredentialBlocked { slot, .. } => {
            warn!(slot, "event: credential blocked");
        }
        AgentEvent::CredentialRecovered { slot, .. } => {
            info!(slot, "event: credential recovered");
        }
    }
}

/// Subscribe to the bus and log every event until the bus closes.
pub fn spawn_observer(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(event.as_ref()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Event observer lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
