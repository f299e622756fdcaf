//! The outbound correlator — from decisions back to the events they answer.
//!
//! The orchestrator registers every inbound event here at ingress. When a
//! flush event arrives, the correlator works out which pending inbound
//! events the decision answers, addresses the replies at the most recent
//! one, and enqueues delivery and thought-recording tasks.

use crate::runner::TaskRunner;
use chattermill_core::decision::{DecisionAction, LlmDecision};
use chattermill_core::event::{AgentEvent, EventBus};
use chattermill_core::message::InboundMessage;
use chattermill_core::outbound::OutboundReply;
use chattermill_core::task::{TaskPayload, TaskPriority};
use chattermill_core::thought::ThoughtRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long an unanswered correlation survives before the sweep evicts it.
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Pending {
    inbound: InboundMessage,
    created_at: DateTime<Utc>,
    seen: tokio::time::Instant,
}

/// Read-only correlator snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelatorStatus {
    pub pending: usize,
}

/// Maps pending inbound events to the decisions that answer them.
pub struct Correlator {
    pending: Mutex<HashMap<String, Pending>>,
    runner: Arc<TaskRunner>,
    ttl: Duration,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Correlator {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            runner,
            ttl: DEFAULT_TTL,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Override the eviction TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Record an inbound event at ingress.
    pub async fn register(&self, inbound: InboundMessage) {
        let mut pending = self.pending.lock().await;
        pending.insert(
            inbound.id.clone(),
            Pending {
                inbound,
                created_at: Utc::now(),
                seen: tokio::time::Instant::now(),
            },
        );
    }

    /// Drop one pending correlation (e.g. when ingress routed the event
    /// elsewhere). Returns whether it existed.
    pub async fn unregister(&self, inbound_id: &str) -> bool {
        self.pending.lock().await.remove(inbound_id).is_some()
    }

    /// Handle one flush event.
    pub async fn handle_flush(
        &self,
        context_id: &str,
        decision: &LlmDecision,
        batch_ids: &[String],
    ) {
        let correlated = self.take_correlated(decision, batch_ids).await;

        match &decision.action {
            DecisionAction::NoReply { reason, thinking } => {
                debug!(
                    context = %context_id,
                    correlated = correlated.len(),
                    reason,
                    "Decision: no reply"
                );
                self.record_thought(context_id, decision, thinking, Some(reason))
                    .await;
            }
            DecisionAction::Reply {
                messages,
                thinking,
                mentions,
            } => {
                // Address replies at the most recent correlated event.
                let Some(target) = correlated.iter().max_by_key(|p| p.created_at) else {
                    warn!(
                        context = %context_id,
                        "Reply decision with no surviving correlations; nothing to deliver"
                    );
                    return;
                };

                for message in messages {
                    let reply = build_reply(&target.inbound, message, mentions);
                    match self
                        .runner
                        .enqueue(
                            TaskPayload::DeliverReply(reply),
                            TaskPriority::Normal,
                            None,
                        )
                        .await
                    {
                        Ok(_completion) => {}
                        Err(e) => warn!(context = %context_id, error = %e, "Could not enqueue reply delivery"),
                    }
                }
                debug!(
                    context = %context_id,
                    replies = messages.len(),
                    target = %target.inbound.id,
                    "Reply deliveries enqueued"
                );

                self.record_thought(context_id, decision, thinking, None).await;
            }
        }
    }

    /// Pick and remove the pending entries this decision answers.
    ///
    /// Strategy order: explicit ids on the decision, else the flushed batch
    /// ids, else — degraded — every currently-pending id.
    async fn take_correlated(&self, decision: &LlmDecision, batch_ids: &[String]) -> Vec<Pending> {
        let mut pending = self.pending.lock().await;

        let ids: Vec<String> = if !decision.correlated_ids.is_empty() {
            debug!(strategy = "explicit", count = decision.correlated_ids.len(), "Correlating");
            decision.correlated_ids.clone()
        } else if !batch_ids.is_empty() {
            debug!(strategy = "batch", count = batch_ids.len(), "Correlating");
            batch_ids.to_vec()
        } else {
            warn!(
                strategy = "all_pending",
                count = pending.len(),
                "Correlating against every pending event (degraded fallback)"
            );
            pending.keys().cloned().collect()
        };

        ids.iter().filter_map(|id| pending.remove(id)).collect()
    }

    async fn record_thought(
        &self,
        context_id: &str,
        decision: &LlmDecision,
        thinking: &str,
        no_reply_reason: Option<&str>,
    ) {
        if thinking.is_empty() {
            return;
        }
        let mut record = ThoughtRecord::new("thinking", thinking)
            .with_meta("contextId", serde_json::json!(context_id))
            .with_meta("replied", serde_json::json!(decision.is_reply()))
            .with_meta("tokensUsed", serde_json::json!(decision.tokens_used));
        if let Some(reason) = no_reply_reason {
            record = record.with_meta("reason", serde_json::json!(reason));
        }
        if let Err(e) = self
            .runner
            .enqueue(TaskPayload::RecordThought(record), TaskPriority::Normal, None)
            .await
        {
            warn!(context = %context_id, error = %e, "Could not enqueue thought record");
        }
    }

    /// Remove pending correlations older than the TTL.
    pub async fn evict_expired(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let now = tokio::time::Instant::now();
        let ttl = self.ttl;
        let before = pending.len();
        pending.retain(|_, p| now.duration_since(p.seen) <= ttl);
        let evicted = before - pending.len();
        if evicted > 0 {
            warn!(evicted, "Evicted stale pending correlations");
        }
        evicted
    }

    /// Read-only snapshot.
    pub async fn status(&self) -> CorrelatorStatus {
        CorrelatorStatus {
            pending: self.pending.lock().await.len(),
        }
    }

    /// Subscribe to flush events on the bus. Call once at startup.
    pub fn spawn_listener(self: &Arc<Self>, events: &EventBus) {
        let correlator = Arc::clone(self);
        let mut rx = events.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let AgentEvent::QueueFlushed {
                            context_id,
                            decision,
                            batch_ids,
                            ..
                        } = event.as_ref()
                        {
                            correlator
                                .handle_flush(context_id, decision, batch_ids)
                                .await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Correlator lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    /// Spawn the periodic eviction sweep. Call once at startup.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let correlator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                correlator.evict_expired().await;
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    /// Stop background tasks and report what never got answered.
    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        let remaining = self.pending.lock().await.len();
        if remaining > 0 {
            info!(remaining, "Pending correlations evicted at shutdown");
        }
    }
}

/// Build the outbound reply for one message string, addressed at the
/// target's originating event, with an optional mention decoration.
fn build_reply(target: &InboundMessage, content: &str, mentions: &[String]) -> OutboundReply {
    match &target.group_id {
        Some(group_id) => {
            let mention = mentions
                .iter()
                .find(|m| *m == &target.sender_id)
                .or_else(|| mentions.first())
                .cloned();
            OutboundReply::Group {
                group_id: group_id.clone(),
                content: content.to_string(),
                mention,
            }
        }
        None => OutboundReply::Direct {
            user_id: target.sender_id.clone(),
            content: content.to_string(),
        },
    }
}
