//! The per-conversation batching queue.
//!
//! One [`ContextState`] per active conversation, created lazily on first
//! enqueue and removed once it is empty with no timer armed and no flush in
//! flight. The `processing` flag serializes flushes per context; contexts
//! flush independently of each other.

use crate::assembler::BatchAssembler;
use chattermill_core::decision::DecisionAction;
use chattermill_core::event::{AgentEvent, DropCause, EventBus};
use chattermill_core::identity::BotIdentity;
use chattermill_core::message::{FlushOutcome, FlushReason, InboundMessage, MessageKind, QueuedMessage};
use chattermill_core::processor::{BatchSnapshot, MessageProcessor};
use chattermill_core::stamina::StaminaLevel;
use chattermill_stamina::StaminaController;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Scheduler knobs; see the configuration crate for the deployed defaults.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Quiet period before a non-priority batch flushes
    pub silence: Duration,
    /// Queue length that forces a flush
    pub max_queue_size: usize,
    /// Oldest-message age that forces a flush
    pub max_queue_age: Duration,
    /// Drop queued messages when stamina is critical (retain when false)
    pub drop_on_critical: bool,
}

struct Buffered {
    msg: QueuedMessage,
    at: Instant,
}

struct ContextState {
    is_group: bool,
    buffered: Vec<Buffered>,
    processing: bool,
    timer: Option<JoinHandle<()>>,
    timer_gen: u64,
    last_flush_at: Option<DateTime<Utc>>,
    last_flush_reason: Option<FlushReason>,
    /// Cleared when the state is removed from the map so a racing enqueue
    /// can detect the orphan and retry.
    live: bool,
}

impl ContextState {
    fn new(is_group: bool) -> Self {
        Self {
            is_group,
            buffered: Vec::new(),
            processing: false,
            timer: None,
            timer_gen: 0,
            last_flush_at: None,
            last_flush_reason: None,
            live: true,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_gen += 1;
    }

    fn removable(&self) -> bool {
        self.buffered.is_empty() && self.timer.is_none() && !self.processing
    }
}

/// Read-only status of one context queue.
#[derive(Debug, Clone, Serialize)]
pub struct ContextQueueStatus {
    pub context_id: String,
    pub queued: usize,
    pub processing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flush_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flush_reason: Option<FlushReason>,
}

/// Read-only status of the whole queue manager.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub contexts: Vec<ContextQueueStatus>,
    pub total_processed: u64,
    pub group_processing: bool,
}

/// Owns all per-context queues and the five trigger policies.
pub struct QueueManager {
    identity: BotIdentity,
    settings: SchedulerSettings,
    stamina: Arc<StaminaController>,
    processor: Arc<dyn MessageProcessor>,
    assembler: Arc<BatchAssembler>,
    events: Arc<EventBus>,
    /// Outer lock guards creation/deletion only; each state has its own lock.
    contexts: Mutex<HashMap<String, Arc<Mutex<ContextState>>>>,
    group_enabled: AtomicBool,
    total_processed: AtomicU64,
}

impl QueueManager {
    pub fn new(
        identity: BotIdentity,
        settings: SchedulerSettings,
        stamina: Arc<StaminaController>,
        processor: Arc<dyn MessageProcessor>,
        assembler: Arc<BatchAssembler>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            identity,
            settings,
            stamina,
            processor,
            assembler,
            events,
            contexts: Mutex::new(HashMap::new()),
            group_enabled: AtomicBool::new(true),
            total_processed: AtomicU64::new(0),
        }
    }

    /// Accept one inbound message and evaluate the trigger policies.
    ///
    /// Returns the flush outcome when a trigger fired, `None` when the
    /// message was merely buffered.
    pub async fn enqueue(self: &Arc<Self>, msg: InboundMessage) -> Option<FlushOutcome> {
        let key = msg.context_key().to_string();
        let is_group = msg.is_group();
        let high_priority =
            msg.kind == MessageKind::Command || self.identity.mentioned_in(&msg.content);

        self.events.publish(AgentEvent::MessageReceived {
            context_id: key.clone(),
            sender_id: msg.sender_id.clone(),
            content_preview: preview(&msg.content),
            timestamp: Utc::now(),
        });

        let queued = QueuedMessage::new(msg, high_priority);

        // Insert, retrying if we raced a concurrent state removal.
        let (state_arc, trigger) = loop {
            let arc = self.get_or_create(&key, is_group).await;
            let mut state = arc.lock().await;
            if !state.live {
                continue;
            }

            state.buffered.push(Buffered {
                msg: queued.clone(),
                at: Instant::now(),
            });
            debug!(
                context = %key,
                queued = state.buffered.len(),
                high_priority,
                "Message enqueued"
            );

            if high_priority {
                drop(state);
                break (arc, Some(FlushReason::HighPriority));
            }

            // Non-priority path: re-arm the silence timer, then check the
            // bounded policies.
            self.arm_timer(&key, &mut state);

            let trigger = if state.buffered.len() >= self.settings.max_queue_size {
                Some(FlushReason::Size)
            } else if state
                .buffered
                .first()
                .is_some_and(|b| b.at.elapsed() >= self.settings.max_queue_age)
            {
                Some(FlushReason::Age)
            } else {
                None
            };
            drop(state);
            break (arc, trigger);
        };

        match trigger {
            Some(reason) => Some(self.flush_state(&key, &state_arc, reason).await),
            None => None,
        }
    }

    /// Operator: flush one context.
    pub async fn flush(self: &Arc<Self>, context_id: &str) -> FlushOutcome {
        match self.lookup(context_id).await {
            Some(arc) => self.flush_state(context_id, &arc, FlushReason::Manual).await,
            None => FlushOutcome::Empty,
        }
    }

    /// Operator: flush every context.
    pub async fn flush_all(self: &Arc<Self>) -> Vec<(String, FlushOutcome)> {
        let keys: Vec<String> = {
            let map = self.contexts.lock().await;
            map.keys().cloned().collect()
        };
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.flush(&key).await;
            results.push((key, outcome));
        }
        results
    }

    /// Operator: drop every queued message without processing.
    pub async fn clear(&self) {
        let mut map = self.contexts.lock().await;
        let mut removed = Vec::new();
        for (key, arc) in map.iter() {
            let mut state = arc.lock().await;
            state.cancel_timer();
            let count = state.buffered.len();
            if count > 0 {
                let ids: Vec<&str> = state
                    .buffered
                    .iter()
                    .map(|b| b.msg.inbound.id.as_str())
                    .collect();
                info!(context = %key, count, ?ids, "Clearing queued messages");
                state.buffered.clear();
                self.events.publish(AgentEvent::MessagesDropped {
                    context_id: key.clone(),
                    count,
                    cause: DropCause::Cleared,
                    timestamp: Utc::now(),
                });
            }
            if state.removable() {
                state.live = false;
                removed.push(key.clone());
            }
        }
        for key in removed {
            map.remove(&key);
        }
    }

    /// Cancel all timers. Buffered messages stay in place; used at shutdown.
    pub async fn cancel_timers(&self) {
        let map = self.contexts.lock().await;
        for arc in map.values() {
            let mut state = arc.lock().await;
            state.cancel_timer();
        }
    }

    /// Toggle group-chat processing globally.
    pub fn set_group_enabled(&self, enabled: bool) {
        info!(operator = true, enabled, "Group processing toggled");
        self.group_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn group_enabled(&self) -> bool {
        self.group_enabled.load(Ordering::Relaxed)
    }

    /// Read-only snapshot for the observability surface.
    pub async fn status(&self) -> QueueStatus {
        let map = self.contexts.lock().await;
        let mut contexts = Vec::with_capacity(map.len());
        for (key, arc) in map.iter() {
            let state = arc.lock().await;
            contexts.push(ContextQueueStatus {
                context_id: key.clone(),
                queued: state.buffered.len(),
                processing: state.processing,
                last_flush_at: state.last_flush_at,
                last_flush_reason: state.last_flush_reason,
            });
        }
        contexts.sort_by(|a, b| a.context_id.cmp(&b.context_id));
        QueueStatus {
            contexts,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            group_processing: self.group_enabled(),
        }
    }

    /// Number of batches processed since startup.
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    // ── Internals ─────────────────────────────────────────────────────────

    async fn get_or_create(&self, key: &str, is_group: bool) -> Arc<Mutex<ContextState>> {
        let mut map = self.contexts.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ContextState::new(is_group))))
            .clone()
    }

    async fn lookup(&self, key: &str) -> Option<Arc<Mutex<ContextState>>> {
        let map = self.contexts.lock().await;
        map.get(key).cloned()
    }

    /// Arm (or re-arm) the one-shot silence timer. Caller holds the state
    /// lock.
    fn arm_timer(self: &Arc<Self>, key: &str, state: &mut ContextState) {
        state.cancel_timer();
        let gen = state.timer_gen;
        let manager = Arc::clone(self);
        let key = key.to_string();
        let delay = self.settings.silence;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.on_silence(key, gen).await;
        }));
    }

    async fn on_silence(self: Arc<Self>, key: String, gen: u64) {
        let Some(arc) = self.lookup(&key).await else {
            return;
        };
        {
            let mut state = arc.lock().await;
            if state.timer_gen != gen {
                // Superseded by a newer timer or a flush.
                return;
            }
            // Drop our own handle without aborting ourselves.
            state.timer = None;
        }
        let _ = self.flush_state(&key, &arc, FlushReason::Silence).await;
    }

    /// The flush protocol for one context.
    async fn flush_state(
        self: &Arc<Self>,
        key: &str,
        state_arc: &Arc<Mutex<ContextState>>,
        reason: FlushReason,
    ) -> FlushOutcome {
        // Atomically: cancel the timer, claim the processing flag.
        let is_group = {
            let mut state = state_arc.lock().await;
            state.cancel_timer();
            if state.processing {
                debug!(context = %key, %reason, "Flush skipped: already processing");
                return FlushOutcome::Busy;
            }
            if state.buffered.is_empty() {
                let outcome = FlushOutcome::Empty;
                drop(state);
                self.maybe_remove(key, state_arc).await;
                return outcome;
            }
            state.processing = true;
            state.is_group
        };

        let outcome = self.flush_claimed(key, state_arc, reason, is_group).await;

        {
            let mut state = state_arc.lock().await;
            state.processing = false;
        }
        self.maybe_remove(key, state_arc).await;
        outcome
    }

    /// Runs with the processing flag held; must not early-return without the
    /// caller clearing it.
    async fn flush_claimed(
        self: &Arc<Self>,
        key: &str,
        state_arc: &Arc<Mutex<ContextState>>,
        reason: FlushReason,
        is_group: bool,
    ) -> FlushOutcome {
        if is_group && !self.group_enabled() {
            let count = {
                let mut state = state_arc.lock().await;
                let count = state.buffered.len();
                state.buffered.clear();
                count
            };
            info!(context = %key, count, "Group processing stopped; batch skipped");
            self.events.publish(AgentEvent::MessagesDropped {
                context_id: key.to_string(),
                count,
                cause: DropCause::GroupDisabled,
                timestamp: Utc::now(),
            });
            return FlushOutcome::SkipReply;
        }

        if !self.stamina.can_reply().await {
            let level = self.stamina.level().await;
            let dropped = if level == StaminaLevel::Critical && self.settings.drop_on_critical {
                let (count, ids) = {
                    let mut state = state_arc.lock().await;
                    let ids: Vec<String> = state
                        .buffered
                        .iter()
                        .map(|b| b.msg.inbound.id.clone())
                        .collect();
                    let count = state.buffered.len();
                    state.buffered.clear();
                    (count, ids)
                };
                warn!(
                    context = %key,
                    count,
                    ?ids,
                    "Stamina critical; dropping queued messages"
                );
                self.events.publish(AgentEvent::MessagesDropped {
                    context_id: key.to_string(),
                    count,
                    cause: DropCause::CriticalStamina,
                    timestamp: Utc::now(),
                });
                count
            } else {
                debug!(context = %key, %level, "Stamina insufficient; batch retained");
                0
            };
            return FlushOutcome::StaminaInsufficient { dropped };
        }

        // Drain into an immutable snapshot and release the lock before the
        // model call.
        let snapshot = {
            let mut state = state_arc.lock().await;
            let messages: Vec<QueuedMessage> =
                state.buffered.drain(..).map(|b| b.msg).collect();
            BatchSnapshot {
                context_id: key.to_string(),
                messages,
                reason,
            }
        };
        if snapshot.messages.is_empty() {
            return FlushOutcome::Empty;
        }

        info!(
            context = %key,
            %reason,
            batch = snapshot.messages.len(),
            "Flushing batch"
        );

        let context = self.assembler.assemble(&snapshot);
        match self.processor.process(&snapshot, &context).await {
            Ok(decision) => {
                self.stamina.consume(snapshot.messages.len()).await;
                if let DecisionAction::Reply { messages, .. } = &decision.action {
                    for message in messages {
                        self.assembler.commit_reply(key, message);
                    }
                }
                {
                    let mut state = state_arc.lock().await;
                    state.last_flush_at = Some(Utc::now());
                    state.last_flush_reason = Some(reason);
                }
                self.total_processed.fetch_add(1, Ordering::Relaxed);
                self.events.publish(AgentEvent::QueueFlushed {
                    context_id: key.to_string(),
                    reason,
                    decision,
                    batch_ids: snapshot.message_ids(),
                    timestamp: Utc::now(),
                });
                FlushOutcome::Processed
            }
            Err(err) => {
                // The batch is considered delivered-with-error; it is not
                // re-enqueued, so an operator can retry manually.
                warn!(context = %key, error = %err, "Batch processing failed; snapshot discarded");
                self.events.publish(AgentEvent::QueueError {
                    context_id: key.to_string(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                FlushOutcome::Errored
            }
        }
    }

    /// Remove the state if it has nothing left to do. Racing enqueues are
    /// handled by the `live` flag.
    async fn maybe_remove(&self, key: &str, state_arc: &Arc<Mutex<ContextState>>) {
        let mut map = self.contexts.lock().await;
        let Some(existing) = map.get(key) else {
            return;
        };
        if !Arc::ptr_eq(existing, state_arc) {
            return;
        }
        let mut state = state_arc.lock().await;
        if state.removable() {
            state.live = false;
            drop(state);
            map.remove(key);
            debug!(context = %key, "Context state removed");
        }
    }
}

fn preview(content: &str) -> String {
    content.chars().take(48).collect()
}
