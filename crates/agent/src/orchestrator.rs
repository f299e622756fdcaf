//! The agent orchestrator — owns the components, routes events, serves the
//! admin and observability surfaces.

use crate::admin::AdminCommand;
use crate::observer::spawn_observer;
use chattermill_config::AppConfig;
use chattermill_core::error::Error;
use chattermill_core::event::EventBus;
use chattermill_core::identity::BotIdentity;
use chattermill_core::message::{InboundMessage, MessageKind};
use chattermill_core::outbound::{OutboundReply, OutboundSink};
use chattermill_core::processor::MessageProcessor;
use chattermill_core::task::TaskKind;
use chattermill_core::thought::ThoughtSink;
use chattermill_credentials::{CredentialPool, CredentialState, PoolConfig, PoolStatus};
use chattermill_dispatch::{
    Correlator, CorrelatorStatus, DeliverReplyHandler, RecordThoughtHandler, TaskRunner,
};
use chattermill_llm::{ChatBackend, LlmClient, PromptBuilder, RetryPolicy};
use chattermill_scheduler::{BatchAssembler, QueueManager, QueueStatus, SchedulerSettings};
use chattermill_stamina::{StaminaController, StaminaParams, StaminaStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Aggregated read-only status for the observability surface.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub bot_id: String,
    pub bot_name: String,
    pub accepting: bool,
    pub degraded: bool,
    pub queue: QueueStatus,
    pub stamina: StaminaStatus,
    pub credentials: PoolStatus,
    pub correlator: CorrelatorStatus,
}

/// Owns the lifecycle of every core component.
pub struct Orchestrator {
    identity: BotIdentity,
    events: Arc<EventBus>,
    pool: Arc<CredentialPool>,
    stamina: Arc<StaminaController>,
    queue: Arc<QueueManager>,
    correlator: Arc<Correlator>,
    runner: Arc<TaskRunner>,
    outbound: Arc<dyn OutboundSink>,
    observer: tokio::task::JoinHandle<()>,
    admin_id: Option<String>,
    accepting: AtomicBool,
    degraded: AtomicBool,
}

impl Orchestrator {
    /// Boot everything: credential pool, stamina controller, LLM client
    /// (with a one-shot health probe), queue manager, correlator, and task
    /// runner.
    ///
    /// A failing probe is non-fatal: the system starts degraded and ingress
    /// still buffers. Missing credentials are fatal.
    pub async fn initialize(
        config: &AppConfig,
        backend: Arc<dyn ChatBackend>,
        outbound: Arc<dyn OutboundSink>,
        thoughts: Arc<dyn ThoughtSink>,
    ) -> Result<Arc<Self>, Error> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let identity = BotIdentity::new(
            config.identity.bot_id.clone(),
            config.identity.bot_name.clone(),
        );
        let events = Arc::new(EventBus::default());

        let pool = Arc::new(CredentialPool::new(
            config.credentials.merged(),
            PoolConfig::default(),
            Arc::clone(&events),
        )?);
        pool.spawn_maintenance();

        let stamina = Arc::new(StaminaController::new(
            StaminaParams {
                max: config.stamina.max,
                base_cost: config.stamina.base_cost,
                exponent: config.stamina.exponent,
                momentum_gain: config.stamina.momentum_gain,
                momentum_decay: config.stamina.momentum_decay,
                momentum_drag: config.stamina.momentum_drag,
                recovery_rate: config.stamina.recovery_rate,
                low_threshold: config.stamina.low_threshold,
                critical_threshold: config.stamina.critical_threshold,
            },
            Duration::from_millis(config.stamina.regen_interval_ms),
            config.stamina.rest_mode,
            Arc::clone(&events),
        ));
        stamina.spawn_tick();

        let client = Arc::new(LlmClient::new(
            backend,
            Arc::clone(&pool),
            PromptBuilder::new(
                config.llm.persona.clone(),
                config.llm.style.clone(),
                identity.clone(),
            ),
            RetryPolicy {
                max_attempts: config.llm.max_attempts,
                base_delay: Duration::from_millis(config.llm.base_delay_ms),
                max_delay: Duration::from_millis(config.llm.max_delay_ms),
            },
        ));

        let degraded = match client.probe().await {
            Ok(()) => {
                info!("Model backend probe succeeded");
                false
            }
            Err(e) => {
                warn!(error = %e, "Model backend probe failed; starting degraded");
                true
            }
        };

        let queue = Arc::new(QueueManager::new(
            identity.clone(),
            SchedulerSettings {
                silence: Duration::from_secs(config.scheduler.silence_seconds),
                max_queue_size: config.scheduler.max_queue_size,
                max_queue_age: Duration::from_secs(config.scheduler.max_queue_age_seconds),
                drop_on_critical: config.scheduler.drop_on_critical,
            },
            Arc::clone(&stamina),
            Arc::clone(&client) as Arc<dyn MessageProcessor>,
            Arc::new(BatchAssembler::new(identity.clone())),
            Arc::clone(&events),
        ));

        let runner = Arc::new(TaskRunner::new(config.tasks.max_attempts));
        runner
            .register(
                TaskKind::DeliverReply,
                Arc::new(DeliverReplyHandler::new(Arc::clone(&outbound))),
            )
            .await;
        runner
            .register(
                TaskKind::RecordThought,
                Arc::new(RecordThoughtHandler::new(thoughts)),
            )
            .await;
        runner.start();

        let correlator = Arc::new(Correlator::new(Arc::clone(&runner)));
        correlator.spawn_listener(&events);
        correlator.spawn_sweeper();

        let observer = spawn_observer(&events);

        info!(bot = %identity.name, "Orchestrator initialized");
        Ok(Arc::new(Self {
            identity,
            events,
            pool,
            stamina,
            queue,
            correlator,
            runner,
            outbound,
            observer,
            admin_id: config.admin.admin_id.clone(),
            accepting: AtomicBool::new(true),
            degraded: AtomicBool::new(degraded),
        }))
    }

    /// Route one inbound bus event.
    ///
    /// Every accepted event is recorded as a pending correlation first.
    /// Command events from the configured admin bypass the queue and get an
    /// immediate reply; anyone else's commands are ordinary text.
    pub async fn handle_event(&self, mut msg: InboundMessage) -> Result<(), Error> {
        if !self.accepting.load(Ordering::Relaxed) {
            info!(id = %msg.id, "Ingress stopped; event dropped");
            return Ok(());
        }

        self.correlator.register(msg.clone()).await;

        if msg.kind == MessageKind::Command {
            if self.is_admin(&msg.sender_id) {
                self.correlator.unregister(&msg.id).await;
                let reply = self.dispatch_admin(&msg.content).await;
                self.respond(&msg, &reply).await?;
                return Ok(());
            }
            // Unauthorized command: ordinary text from here on.
            msg.kind = MessageKind::Text;
        }

        let _ = self.queue.enqueue(msg).await;
        Ok(())
    }

    /// Execute one admin operation, returning the reply text.
    pub async fn dispatch_admin(&self, input: &str) -> String {
        let Some(command) = AdminCommand::parse(input) else {
            return format!("unknown command: {input}");
        };
        info!(operator = true, ?command, "Admin command");

        match command {
            AdminCommand::QueueStatus => {
                let status = self.queue.status().await;
                let mut out = format!(
                    "queues: {} active, {} batches processed, groups {}\n",
                    status.contexts.len(),
                    status.total_processed,
                    if status.group_processing { "on" } else { "off" }
                );
                for ctx in &status.contexts {
                    out.push_str(&format!(
                        "  {}: {} queued{}\n",
                        ctx.context_id,
                        ctx.queued,
                        if ctx.processing { " (processing)" } else { "" }
                    ));
                }
                out.trim_end().to_string()
            }
            AdminCommand::QueueFlush => {
                let results = self.queue.flush_all().await;
                let processed = results.iter().filter(|(_, o)| o.processed()).count();
                format!("flushed {processed}/{} contexts", results.len())
            }
            AdminCommand::QueueClear => {
                self.queue.clear().await;
                "queues cleared".into()
            }
            AdminCommand::Stamina => {
                let s = self.stamina.status().await;
                format!(
                    "stamina {:.1}/{:.0} ({}), momentum {:.2}{}",
                    s.current,
                    s.max,
                    s.level,
                    s.momentum,
                    if s.rest_mode { ", resting" } else { "" }
                )
            }
            AdminCommand::StaminaRest => {
                let resting = self.stamina.status().await.rest_mode;
                self.stamina.set_rest(!resting).await;
                if resting {
                    "rest mode off".into()
                } else {
                    "rest mode on".into()
                }
            }
            AdminCommand::StaminaSet(value) => {
                self.stamina.set_current(value).await;
                format!("stamina set to {:.1}", self.stamina.status().await.current)
            }
            AdminCommand::ApiKeys => {
                let status = self.pool.status().await;
                let mut out = String::new();
                for (i, cred) in status.credentials.iter().enumerate() {
                    let marker = if i == status.cursor { "*" } else { " " };
                    out.push_str(&format!(
                        "{marker} {} {:?} (errors: {})\n",
                        cred.key, cred.state, cred.error_count
                    ));
                }
                out.trim_end().to_string()
            }
            AdminCommand::ResetKey(prefix) => {
                let count = self.pool.force_reset(&prefix).await;
                format!("reset {count} key(s) matching '{prefix}'")
            }
            AdminCommand::SwitchKey => {
                self.pool.force_advance().await;
                "advanced to the next credential".into()
            }
            AdminCommand::Start => {
                self.queue.set_group_enabled(true);
                "group processing started".into()
            }
            AdminCommand::Stop => {
                self.queue.set_group_enabled(false);
                "group processing stopped".into()
            }
        }
    }

    /// Aggregated status for the observability surface.
    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            bot_id: self.identity.id.clone(),
            bot_name: self.identity.name.clone(),
            accepting: self.accepting.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            queue: self.queue.status().await,
            stamina: self.stamina.status().await,
            credentials: self.pool.status().await,
            correlator: self.correlator.status().await,
        }
    }

    /// Whether the pool currently has a healthy credential.
    pub async fn has_healthy_credential(&self) -> bool {
        self.pool
            .status()
            .await
            .credentials
            .iter()
            .any(|c| c.state != CredentialState::Blocked)
    }

    /// The event bus, for additional subscribers (observability, tests).
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Graceful shutdown: stop ingress, drain the in-flight task, cancel
    /// timers, stop background loops, report unanswered correlations.
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.accepting.store(false, Ordering::Relaxed);
        self.runner.shutdown().await;
        self.queue.cancel_timers().await;
        self.stamina.shutdown().await;
        self.pool.shutdown();
        self.correlator.shutdown().await;
        self.observer.abort();
    }

    fn is_admin(&self, sender_id: &str) -> bool {
        self.admin_id.as_deref() == Some(sender_id)
    }

    async fn respond(&self, origin: &InboundMessage, text: &str) -> Result<(), Error> {
        let reply = match &origin.group_id {
            Some(group_id) => OutboundReply::Group {
                group_id: group_id.clone(),
                content: text.to_string(),
                mention: None,
            },
            None => OutboundReply::Direct {
                user_id: origin.sender_id.clone(),
                content: text.to_string(),
            },
        };
        self.outbound.deliver(reply).await?;
        Ok(())
    }
}
