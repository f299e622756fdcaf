//! Configuration loading, validation, and management for chattermill.
//!
//! Loads configuration from `~/.chattermill/config.toml` with environment
//! variable overrides. Validates all settings at startup: a configuration
//! with no credentials refuses to start.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    #[error("Cannot parse config file: {message}")]
    ParseError { message: String },

    #[error("No LLM credentials configured; set [credentials].primary or CHATTERMILL_API_KEY")]
    MissingCredentials,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
///
/// Maps directly to `~/.chattermill/config.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Who the bot is on the bus
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Batching scheduler knobs
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Fatigue model parameters
    #[serde(default)]
    pub stamina: StaminaConfig,

    /// API credentials for the model backend
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Remote model settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Async task runner settings
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Thought log settings
    #[serde(default)]
    pub thought_log: ThoughtLogConfig,

    /// Admin control settings
    #[serde(default)]
    pub admin: AdminConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("identity", &self.identity)
            .field("scheduler", &self.scheduler)
            .field("stamina", &self.stamina)
            .field("credentials", &self.credentials)
            .field("llm", &self.llm)
            .field("tasks", &self.tasks)
            .field("thought_log", &self.thought_log)
            .field("admin", &self.admin)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Opaque bus account id
    #[serde(default = "default_bot_id")]
    pub bot_id: String,

    /// Display name users mention; defaults to the id when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
}

fn default_bot_id() -> String {
    "chattermill".into()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            bot_id: default_bot_id(),
            bot_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Quiet period before a non-priority batch flushes
    #[serde(default = "default_silence_seconds")]
    pub silence_seconds: u64,

    /// Queue length that forces a flush
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Oldest-message age that forces a flush
    #[serde(default = "default_max_queue_age_seconds")]
    pub max_queue_age_seconds: u64,

    /// Drop queued messages when stamina is critical (retain when false)
    #[serde(default = "default_true")]
    pub drop_on_critical: bool,
}

fn default_silence_seconds() -> u64 {
    8
}
fn default_max_queue_size() -> usize {
    10
}
fn default_max_queue_age_seconds() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            silence_seconds: default_silence_seconds(),
            max_queue_size: default_max_queue_size(),
            max_queue_age_seconds: default_max_queue_age_seconds(),
            drop_on_critical: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaminaConfig {
    /// S_max — the stamina cap
    #[serde(default = "default_stamina_max")]
    pub max: f64,

    /// k — base cost per message unit
    #[serde(default = "default_base_cost")]
    pub base_cost: f64,

    /// p — non-linearity exponent on batch intensity
    #[serde(default = "default_exponent")]
    pub exponent: f64,

    /// α — momentum accrual per unit of intensity
    #[serde(default = "default_momentum_gain")]
    pub momentum_gain: f64,

    /// β — momentum decay rate
    #[serde(default = "default_momentum_decay")]
    pub momentum_decay: f64,

    /// γ — how strongly momentum suppresses recovery
    #[serde(default = "default_momentum_drag")]
    pub momentum_drag: f64,

    /// r — base recovery rate
    #[serde(default = "default_recovery_rate")]
    pub recovery_rate: f64,

    /// Background tick interval in milliseconds
    #[serde(default = "default_regen_interval_ms")]
    pub regen_interval_ms: u64,

    /// Warn boundary, in stamina units
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Below this (strictly), level is critical; in stamina units
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,

    /// Start in rest mode
    #[serde(default)]
    pub rest_mode: bool,
}

fn default_stamina_max() -> f64 {
    100.0
}
fn default_base_cost() -> f64 {
    1.0
}
fn default_exponent() -> f64 {
    1.0
}
fn default_momentum_gain() -> f64 {
    0.5
}
fn default_momentum_decay() -> f64 {
    0.1
}
fn default_momentum_drag() -> f64 {
    0.4
}
fn default_recovery_rate() -> f64 {
    2.0
}
fn default_regen_interval_ms() -> u64 {
    1000
}
fn default_low_threshold() -> f64 {
    30.0
}
fn default_critical_threshold() -> f64 {
    10.0
}

impl Default for StaminaConfig {
    fn default() -> Self {
        Self {
            max: default_stamina_max(),
            base_cost: default_base_cost(),
            exponent: default_exponent(),
            momentum_gain: default_momentum_gain(),
            momentum_decay: default_momentum_decay(),
            momentum_drag: default_momentum_drag(),
            recovery_rate: default_recovery_rate(),
            regen_interval_ms: default_regen_interval_ms(),
            low_threshold: default_low_threshold(),
            critical_threshold: default_critical_threshold(),
            rest_mode: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    /// Primary API keys, tried in order
    #[serde(default)]
    pub primary: Vec<String>,

    /// Backup keys appended after the primaries
    #[serde(default)]
    pub backup: Vec<String>,
}

impl CredentialsConfig {
    /// Primary then backup, deduplicated, insertion order preserved.
    pub fn merged(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.primary
            .iter()
            .chain(self.backup.iter())
            .filter(|k| !k.is_empty() && seen.insert(k.as_str()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("primary", &format!("[{} key(s)]", self.primary.len()))
            .field("backup", &format!("[{} key(s)]", self.backup.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier sent to the backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Backend base URL (OpenAI-compatible chat endpoint)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Attempts per logical call
    #[serde(default = "default_llm_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Persona system text prepended to every prompt
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Enumerated style guidance lines
    #[serde(default)]
    pub style: Vec<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_llm_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_persona() -> String {
    "You are a helpful chat participant.".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            max_attempts: default_llm_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            persona: default_persona(),
            style: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Default retry bound for enqueued tasks
    #[serde(default = "default_task_max_attempts")]
    pub max_attempts: u32,
}

fn default_task_max_attempts() -> u32 {
    3
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_task_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtLogConfig {
    /// NDJSON file the thought sink appends to
    #[serde(default = "default_thought_log_path")]
    pub path: String,
}

fn default_thought_log_path() -> String {
    "~/.chattermill/thoughts.ndjson".into()
}

impl Default for ThoughtLogConfig {
    fn default() -> Self {
        Self {
            path: default_thought_log_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// The only sender whose commands are dispatched; others are plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path
    /// (`~/.chattermill/config.toml`), then apply environment overrides:
    ///
    /// - `CHATTERMILL_API_KEY` — prepended to the primary credential list
    /// - `CHATTERMILL_MODEL` — overrides `llm.model`
    /// - `CHATTERMILL_BASE_URL` — overrides `llm.base_url`
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_dir().join("config.toml");
        let config = Self::load_from(&path)?;
        Ok(config.with_env_overrides())
    }

    /// Load from an explicit path, applying the same env overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load_from(path)?.with_env_overrides())
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("CHATTERMILL_API_KEY") {
            if !key.is_empty() && !self.credentials.primary.contains(&key) {
                self.credentials.primary.insert(0, key);
            }
        }
        if let Ok(model) = std::env::var("CHATTERMILL_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(url) = std::env::var("CHATTERMILL_BASE_URL") {
            if !url.is_empty() {
                self.llm.base_url = url;
            }
        }
        self
    }

    /// The configuration directory: `~/.chattermill`.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chattermill")
    }

    /// Fail fast on configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.merged().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        if self.stamina.max <= 0.0 {
            return Err(ConfigError::Invalid("stamina.max must be positive".into()));
        }
        if self.stamina.critical_threshold > self.stamina.max {
            return Err(ConfigError::Invalid(
                "stamina.critical_threshold exceeds stamina.max".into(),
            ));
        }
        if self.scheduler.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_queue_size must be at least 1".into(),
            ));
        }
        if self.llm.max_attempts == 0 || self.tasks.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts settings must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// A commented default configuration, for `chattermill onboard`.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.silence_seconds, 8);
        assert_eq!(config.scheduler.max_queue_size, 10);
        assert_eq!(config.scheduler.max_queue_age_seconds, 30);
        assert_eq!(config.stamina.max, 100.0);
        assert_eq!(config.stamina.critical_threshold, 10.0);
        assert_eq!(config.stamina.regen_interval_ms, 1000);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.tasks.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.scheduler.max_queue_size, config.scheduler.max_queue_size);
        assert_eq!(parsed.stamina.momentum_decay, config.stamina.momentum_decay);
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn validation_passes_with_a_key() {
        let mut config = AppConfig::default();
        config.credentials.primary.push("sk-test".into());
        config.validate().unwrap();
    }

    #[test]
    fn merged_credentials_dedupe_preserving_order() {
        let creds = CredentialsConfig {
            primary: vec!["a".into(), "b".into()],
            backup: vec!["b".into(), "c".into(), "".into()],
        };
        assert_eq!(creds.merged(), vec!["a", "b", "c"]);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [identity]
            bot_id = "10042"
            bot_name = "FingerBot"

            [scheduler]
            silence_seconds = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.identity.bot_name.as_deref(), Some("FingerBot"));
        assert_eq!(config.scheduler.silence_seconds, 2);
        assert_eq!(config.scheduler.max_queue_size, 10);
    }

    #[test]
    fn debug_redacts_credentials() {
        let mut config = AppConfig::default();
        config.credentials.primary.push("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("1 key(s)"));
    }

    #[test]
    fn invalid_queue_size_rejected() {
        let mut config = AppConfig::default();
        config.credentials.primary.push("k".into());
        config.scheduler.max_queue_size = 0;
        assert!(config.validate().is_err());
    }
}
