//! The rotating credential pool.

use chattermill_core::error::{Error, LlmError};
use chattermill_core::event::{AgentEvent, EventBus};
use chrono::{Local, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often the background sweep releases expired blocks.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Failure-accounting knobs. The defaults are the deployed policy:
/// 5 errors in 5 minutes → 1 hour block.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sliding window for rate-limit failure accounting
    pub error_window: Duration,
    /// Errors within the window that trigger a block
    pub block_threshold: u32,
    /// How long a block lasts before the sweep releases it
    pub block_duration: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            error_window: Duration::from_secs(5 * 60),
            block_threshold: 5,
            block_duration: Duration::from_secs(60 * 60),
        }
    }
}

/// How a remote call using a leased credential went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// Counts toward the block window
    RateLimited,
    /// Rotation-worthy but not block-worthy
    CredentialInvalid,
    /// Recorded for diagnostics only
    Other,
}

impl From<&LlmError> for CallOutcome {
    fn from(err: &LlmError) -> Self {
        match err {
            LlmError::RateLimited { .. } => CallOutcome::RateLimited,
            LlmError::CredentialInvalid { .. } => CallOutcome::CredentialInvalid,
            _ => CallOutcome::Other,
        }
    }
}

/// A credential handed to a caller; report the outcome back with the slot.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    pub slot: usize,
    pub secret: String,
}

/// Lifecycle state of one credential, for status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Healthy,
    Failing,
    Blocked,
}

/// Read-only status of one credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// Masked secret, enough to identify a key without leaking it
    pub key: String,
    pub state: CredentialState,
    pub error_count: u32,
    /// Seconds until the sweep releases the block, when blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_remaining_secs: Option<u64>,
}

/// Read-only status of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub credentials: Vec<CredentialStatus>,
    pub cursor: usize,
    /// True when every credential is blocked
    pub degraded: bool,
}

struct Slot {
    secret: String,
    error_count: u32,
    blocked_at: Option<Instant>,
    window_started: Option<Instant>,
    other_failures: u64,
}

impl Slot {
    fn new(secret: String) -> Self {
        Self {
            secret,
            error_count: 0,
            blocked_at: None,
            window_started: None,
            other_failures: 0,
        }
    }

    fn is_blocked(&self) -> bool {
        self.blocked_at.is_some()
    }

    fn state(&self) -> CredentialState {
        if self.is_blocked() {
            CredentialState::Blocked
        } else if self.error_count > 0 {
            CredentialState::Failing
        } else {
            CredentialState::Healthy
        }
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.blocked_at = None;
        self.window_started = None;
    }
}

struct Inner {
    slots: Vec<Slot>,
    cursor: usize,
}

/// Ordered, deduplicated credential set with a rotation cursor.
pub struct CredentialPool {
    config: PoolConfig,
    inner: Mutex<Inner>,
    events: Arc<EventBus>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CredentialPool {
    /// Build a pool from an ordered key list. Duplicates are dropped,
    /// insertion order is preserved. An empty list is a startup error.
    pub fn new(
        keys: impl IntoIterator<Item = String>,
        config: PoolConfig,
        events: Arc<EventBus>,
    ) -> Result<Self, Error> {
        let mut seen = std::collections::HashSet::new();
        let slots: Vec<Slot> = keys
            .into_iter()
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .map(Slot::new)
            .collect();

        if slots.is_empty() {
            return Err(Error::Config {
                message: "credential pool requires at least one key".into(),
            });
        }

        info!(count = slots.len(), "Credential pool initialized");
        Ok(Self {
            config,
            inner: Mutex::new(Inner { slots, cursor: 0 }),
            events,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Lease the first non-blocked credential at or after the cursor.
    ///
    /// When every credential is blocked, the earliest-blocked one is leased
    /// anyway (degraded mode) with a warning.
    pub async fn acquire(&self) -> CredentialLease {
        let mut inner = self.inner.lock().await;
        self.sweep_locked(&mut inner);

        let len = inner.slots.len();
        for offset in 0..len {
            let idx = (inner.cursor + offset) % len;
            if !inner.slots[idx].is_blocked() {
                inner.cursor = idx;
                return CredentialLease {
                    slot: idx,
                    secret: inner.slots[idx].secret.clone(),
                };
            }
        }

        // Degraded mode: everything is blocked; pick the earliest block.
        let idx = (0..len)
            .min_by_key(|&i| inner.slots[i].blocked_at)
            .unwrap_or(0);
        warn!(
            slot = idx,
            "All credentials blocked; leasing earliest-blocked key in degraded mode"
        );
        CredentialLease {
            slot: idx,
            secret: inner.slots[idx].secret.clone(),
        }
    }

    /// Record how a call with the leased credential went.
    pub async fn report_outcome(&self, slot: usize, outcome: CallOutcome) {
        let mut inner = self.inner.lock().await;
        let threshold = self.config.block_threshold;
        let window = self.config.error_window;
        let Some(s) = inner.slots.get_mut(slot) else {
            return;
        };

        match outcome {
            CallOutcome::Success => {
                s.error_count = 0;
                s.window_started = None;
            }
            CallOutcome::RateLimited => {
                let now = Instant::now();
                match s.window_started {
                    Some(started) if now.duration_since(started) > window => {
                        // Window elapsed; restart it with this failure.
                        s.window_started = Some(now);
                        s.error_count = 1;
                    }
                    Some(_) => s.error_count += 1,
                    None => {
                        s.window_started = Some(now);
                        s.error_count = 1;
                    }
                }

                if s.error_count >= threshold && !s.is_blocked() {
                    s.blocked_at = Some(now);
                    warn!(
                        slot,
                        errors = s.error_count,
                        "Credential blocked after repeated rate limits"
                    );
                    self.events.publish(AgentEvent::CredentialBlocked {
                        slot,
                        timestamp: Utc::now(),
                    });
                    Self::advance_locked(&mut inner);
                }
            }
            CallOutcome::CredentialInvalid | CallOutcome::Other => {
                s.other_failures += 1;
                debug!(slot, total = s.other_failures, "Non-blocking credential failure recorded");
            }
        }
    }

    /// Release blocks older than the block duration.
    pub async fn sweep(&self) {
        let mut inner = self.inner.lock().await;
        self.sweep_locked(&mut inner);
    }

    fn sweep_locked(&self, inner: &mut Inner) {
        let now = Instant::now();
        for (idx, slot) in inner.slots.iter_mut().enumerate() {
            if let Some(blocked_at) = slot.blocked_at {
                if now.duration_since(blocked_at) > self.config.block_duration {
                    slot.reset();
                    info!(slot = idx, "Credential block expired; key available again");
                    self.events.publish(AgentEvent::CredentialRecovered {
                        slot: idx,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    /// Clear all error counts and blocks.
    pub async fn daily_reset(&self) {
        let mut inner = self.inner.lock().await;
        let recovered: Vec<usize> = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_blocked())
            .map(|(i, _)| i)
            .collect();
        for slot in inner.slots.iter_mut() {
            slot.reset();
        }
        info!("Daily credential reset applied");
        for slot in recovered {
            self.events.publish(AgentEvent::CredentialRecovered {
                slot,
                timestamp: Utc::now(),
            });
        }
    }

    /// Move the cursor to the next non-blocked credential. Used by the LLM
    /// client between attempts; not an operator action.
    pub async fn advance(&self) {
        let mut inner = self.inner.lock().await;
        Self::advance_locked(&mut inner);
    }

    fn advance_locked(inner: &mut Inner) {
        let len = inner.slots.len();
        for offset in 1..=len {
            let idx = (inner.cursor + offset) % len;
            if !inner.slots[idx].is_blocked() {
                inner.cursor = idx;
                return;
            }
        }
        // Everything blocked; leave the cursor where it is.
    }

    /// Operator: skip to the next credential.
    pub async fn force_advance(&self) {
        info!(operator = true, "Credential cursor advanced by operator");
        self.advance().await;
    }

    /// Operator: reset error state on every credential whose key starts with
    /// `prefix`. Returns how many matched.
    pub async fn force_reset(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for slot in inner.slots.iter_mut() {
            if slot.secret.starts_with(prefix) {
                slot.reset();
                count += 1;
            }
        }
        info!(operator = true, prefix, count, "Credential state reset by operator");
        count
    }

    /// Read-only pool snapshot for the observability surface.
    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let credentials = inner
            .slots
            .iter()
            .map(|s| CredentialStatus {
                key: mask(&s.secret),
                state: s.state(),
                error_count: s.error_count,
                blocked_remaining_secs: s.blocked_at.map(|at| {
                    self.config
                        .block_duration
                        .saturating_sub(now.duration_since(at))
                        .as_secs()
                }),
            })
            .collect::<Vec<_>>();
        let degraded = credentials.iter().all(|c| c.state == CredentialState::Blocked);
        PoolStatus {
            credentials,
            cursor: inner.cursor,
            degraded,
        }
    }

    /// Spawn the maintenance loops: a periodic block sweep and the
    /// local-midnight reset. Call once at startup.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let reset = tokio::spawn(async move {
            loop {
                let wait = duration_until_local_midnight();
                debug!(secs = wait.as_secs(), "Next daily credential reset scheduled");
                tokio::time::sleep(wait).await;
                pool.daily_reset().await;
            }
        });

        let pool = Arc::clone(self);
        let sweeper = tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                pool.sweep().await;
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(reset);
        tasks.push(sweeper);
    }

    /// Stop the maintenance loops.
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// Wall-clock seconds until the next local midnight.
fn duration_until_local_midnight() -> Duration {
    let now = Local::now();
    let tomorrow = now.date_naive() + chrono::Days::new(1);
    let Some(midnight) = tomorrow.and_hms_opt(0, 0, 0) else {
        return Duration::from_secs(24 * 60 * 60);
    };
    match Local.from_local_datetime(&midnight).earliest() {
        Some(next) => (next - now)
            .to_std()
            .unwrap_or(Duration::from_secs(24 * 60 * 60)),
        None => Duration::from_secs(24 * 60 * 60),
    }
}

/// Show enough of a key to identify it without leaking it.
fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(8).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(keys: &[&str]) -> CredentialPool {
        CredentialPool::new(
            keys.iter().map(|k| k.to_string()),
            PoolConfig::default(),
            Arc::new(EventBus::default()),
        )
        .unwrap()
    }

    #[test]
    fn empty_pool_is_a_config_error() {
        let result = CredentialPool::new(
            Vec::<String>::new(),
            PoolConfig::default(),
            Arc::new(EventBus::default()),
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn duplicates_are_dropped_in_order() {
        let pool = pool_with(&["a", "b", "a", "c"]);
        let status = pool.status().await;
        assert_eq!(status.credentials.len(), 3);
        assert_eq!(status.credentials[0].key, "a…");
        assert_eq!(status.credentials[2].key, "c…");
    }

    #[tokio::test]
    async fn acquire_sticks_to_cursor_until_rotation() {
        let pool = pool_with(&["key-a", "key-b"]);
        assert_eq!(pool.acquire().await.secret, "key-a");
        assert_eq!(pool.acquire().await.secret, "key-a");
        pool.advance().await;
        assert_eq!(pool.acquire().await.secret, "key-b");
    }

    #[tokio::test]
    async fn five_rate_limits_block_and_rotate() {
        let pool = pool_with(&["key-a", "key-b"]);
        let lease = pool.acquire().await;
        for _ in 0..5 {
            pool.report_outcome(lease.slot, CallOutcome::RateLimited).await;
        }
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Blocked);
        assert_eq!(pool.acquire().await.secret, "key-b");
    }

    #[tokio::test]
    async fn success_resets_the_error_count() {
        let pool = pool_with(&["key-a"]);
        for _ in 0..4 {
            pool.report_outcome(0, CallOutcome::RateLimited).await;
        }
        pool.report_outcome(0, CallOutcome::Success).await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Healthy);
        assert_eq!(status.credentials[0].error_count, 0);
    }

    #[tokio::test]
    async fn invalid_credential_does_not_count_toward_block() {
        let pool = pool_with(&["key-a"]);
        for _ in 0..10 {
            pool.report_outcome(0, CallOutcome::CredentialInvalid).await;
        }
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_window_restarts_accounting() {
        let pool = pool_with(&["key-a"]);
        for _ in 0..4 {
            pool.report_outcome(0, CallOutcome::RateLimited).await;
        }
        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        // Window elapsed: this failure starts a fresh window, no block.
        pool.report_outcome(0, CallOutcome::RateLimited).await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Failing);
        assert_eq!(status.credentials[0].error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_expires_after_an_hour() {
        let pool = pool_with(&["key-a", "key-b"]);
        for _ in 0..5 {
            pool.report_outcome(0, CallOutcome::RateLimited).await;
        }
        assert_eq!(pool.acquire().await.secret, "key-b");

        tokio::time::advance(Duration::from_secs(61 * 60)).await;
        pool.sweep().await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Healthy);
    }

    #[tokio::test]
    async fn degraded_mode_leases_earliest_block() {
        let pool = pool_with(&["key-a", "key-b"]);
        for slot in [0usize, 1] {
            for _ in 0..5 {
                pool.report_outcome(slot, CallOutcome::RateLimited).await;
            }
        }
        let status = pool.status().await;
        assert!(status.degraded);
        // key-a was blocked first, so degraded mode hands it out.
        assert_eq!(pool.acquire().await.secret, "key-a");
    }

    #[tokio::test]
    async fn daily_reset_clears_blocks() {
        let pool = pool_with(&["key-a"]);
        for _ in 0..5 {
            pool.report_outcome(0, CallOutcome::RateLimited).await;
        }
        pool.daily_reset().await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Healthy);
        assert_eq!(status.credentials[0].error_count, 0);
    }

    #[tokio::test]
    async fn force_reset_matches_by_prefix() {
        let pool = pool_with(&["sk-aaa-1", "sk-bbb-2"]);
        for _ in 0..5 {
            pool.report_outcome(0, CallOutcome::RateLimited).await;
        }
        assert_eq!(pool.force_reset("sk-aaa").await, 1);
        let status = pool.status().await;
        assert_eq!(status.credentials[0].state, CredentialState::Healthy);
    }

    #[test]
    fn masked_keys_do_not_leak() {
        assert_eq!(mask("sk-secret-long-key"), "sk-secre…");
        assert_eq!(mask("ab"), "ab…");
    }
}
