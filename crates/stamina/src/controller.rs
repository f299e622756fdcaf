//! The stamina controller — lock, background tick, events, reply gate.

use crate::model::{StaminaParams, StaminaState};
use chattermill_core::event::{AgentEvent, EventBus};
use chattermill_core::stamina::StaminaLevel;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Read-only stamina snapshot for the observability surface.
#[derive(Debug, Clone, Serialize)]
pub struct StaminaStatus {
    pub current: f64,
    pub max: f64,
    pub momentum: f64,
    pub level: StaminaLevel,
    pub rest_mode: bool,
}

struct Inner {
    state: StaminaState,
    level: StaminaLevel,
    last_update: Instant,
}

/// Owns the single process-wide [`StaminaState`]. The background tick and
/// batch consumption both go through the same lock; level transitions are
/// published on the event bus.
pub struct StaminaController {
    params: StaminaParams,
    regen_interval: Duration,
    inner: Mutex<Inner>,
    events: Arc<EventBus>,
    stop: watch::Sender<bool>,
    tick_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StaminaController {
    pub fn new(
        params: StaminaParams,
        regen_interval: Duration,
        rest_mode: bool,
        events: Arc<EventBus>,
    ) -> Self {
        let state = StaminaState::full(&params, rest_mode);
        let level = state.level(&params);
        let (stop, _) = watch::channel(false);
        Self {
            params,
            regen_interval,
            inner: Mutex::new(Inner {
                state,
                level,
                last_update: Instant::now(),
            }),
            events,
            stop,
            tick_task: std::sync::Mutex::new(None),
        }
    }

    /// Spawn the background regeneration tick. Call once at startup.
    pub fn spawn_tick(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();
        let interval = self.regen_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => controller.tick().await,
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Stamina tick stopped");
        });
        *self.tick_task.lock().unwrap() = Some(handle);
    }

    /// Apply one background update covering the elapsed wall time.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        self.advance_clock(&mut inner);
        self.settle_level(&mut inner);
    }

    /// Charge a processed batch of `message_count` messages. First applies
    /// the elapsed background time, then one unit step at the batch's
    /// intensity.
    pub async fn consume(&self, message_count: usize) {
        let mut inner = self.inner.lock().await;
        self.advance_clock(&mut inner);
        inner.state.update(&self.params, message_count as f64, 1.0);
        debug!(
            messages = message_count,
            current = inner.state.current,
            momentum = inner.state.momentum,
            "Stamina consumed"
        );
        if inner.state.current < self.params.low_threshold {
            warn!(current = inner.state.current, "Stamina running low");
        }
        self.settle_level(&mut inner);
    }

    /// The reply gate consulted by the scheduler before each flush.
    pub async fn can_reply(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.state.can_reply(&self.params)
    }

    /// Current level label.
    pub async fn level(&self) -> StaminaLevel {
        let inner = self.inner.lock().await;
        inner.state.level(&self.params)
    }

    /// Operator: pin the current value (clamped into `[0, max]`).
    pub async fn set_current(&self, value: f64) {
        let mut inner = self.inner.lock().await;
        inner.state.current = value.clamp(0.0, self.params.max);
        inner.last_update = Instant::now();
        info!(operator = true, current = inner.state.current, "Stamina set");
        self.settle_level(&mut inner);
    }

    /// Operator: toggle rest mode.
    pub async fn set_rest(&self, rest: bool) {
        let mut inner = self.inner.lock().await;
        // Settle elapsed time under the old mode before switching.
        self.advance_clock(&mut inner);
        inner.state.rest_mode = rest;
        info!(operator = true, rest, "Rest mode toggled");
    }

    /// Read-only snapshot.
    pub async fn status(&self) -> StaminaStatus {
        let inner = self.inner.lock().await;
        StaminaStatus {
            current: inner.state.current,
            max: self.params.max,
            momentum: inner.state.momentum,
            level: inner.state.level(&self.params),
            rest_mode: inner.state.rest_mode,
        }
    }

    /// Stop the background tick.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let handle = self.tick_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn advance_clock(&self, inner: &mut Inner) {
        let now = Instant::now();
        let dt = now.duration_since(inner.last_update).as_secs_f64();
        inner.last_update = now;
        inner.state.update(&self.params, 0.0, dt);
    }

    fn settle_level(&self, inner: &mut Inner) {
        let level = inner.state.level(&self.params);
        if level != inner.level {
            let from = inner.level;
            inner.level = level;
            info!(%from, to = %level, current = inner.state.current, "Stamina level changed");
            self.events.publish(AgentEvent::StaminaLevelChanged {
                from,
                to: level,
                current: inner.state.current,
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StaminaParams {
        StaminaParams {
            max: 100.0,
            base_cost: 1.0,
            exponent: 1.0,
            momentum_gain: 0.5,
            momentum_decay: 0.1,
            momentum_drag: 0.4,
            recovery_rate: 2.0,
            low_threshold: 30.0,
            critical_threshold: 10.0,
        }
    }

    fn controller() -> StaminaController {
        StaminaController::new(
            params(),
            Duration::from_millis(1000),
            false,
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn starts_full_and_ready() {
        let c = controller();
        assert!(c.can_reply().await);
        let status = c.status().await;
        assert_eq!(status.current, 100.0);
        assert_eq!(status.level, StaminaLevel::High);
    }

    #[tokio::test]
    async fn consume_drains_and_gates() {
        let c = controller();
        c.set_current(12.0).await;
        c.consume(8).await;
        let status = c.status().await;
        assert!(status.current < 10.0);
        assert_eq!(status.level, StaminaLevel::Critical);
        assert!(!c.can_reply().await);
    }

    #[tokio::test]
    async fn set_current_clamps() {
        let c = controller();
        c.set_current(250.0).await;
        assert_eq!(c.status().await.current, 100.0);
        c.set_current(-5.0).await;
        assert_eq!(c.status().await.current, 0.0);
    }

    #[tokio::test]
    async fn rest_mode_blocks_replies() {
        let c = controller();
        c.set_rest(true).await;
        assert!(!c.can_reply().await);
        c.set_rest(false).await;
        assert!(c.can_reply().await);
    }

    #[tokio::test]
    async fn level_transition_publishes_event() {
        let bus = Arc::new(EventBus::default());
        let c = StaminaController::new(
            params(),
            Duration::from_millis(1000),
            false,
            Arc::clone(&bus),
        );
        let mut rx = bus.subscribe();
        c.set_current(5.0).await;

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::StaminaLevelChanged { from, to, .. } => {
                assert_eq!(*from, StaminaLevel::High);
                assert_eq!(*to, StaminaLevel::Critical);
            }
            other => panic!("Expected StaminaLevelChanged, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn background_time_recovers_before_consume() {
        let c = controller();
        c.set_current(50.0).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        // The elapsed 10s of recovery lands before the batch cost.
        c.consume(1).await;
        let status = c.status().await;
        assert!(status.current > 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_tick_recovers_over_time() {
        let c = Arc::new(controller());
        c.set_current(40.0).await;
        c.spawn_tick();
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        let status = c.status().await;
        assert!(status.current > 40.0);
        c.shutdown().await;
    }
}
