//! The thought log seam — persisting the model's reasoning traces.
//!
//! Records are appended as NDJSON (one JSON object per line). The field
//! names are a contract with the external log collaborator, hence the
//! camelCase renames.

use crate::error::ThoughtLogError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One appended thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtRecord {
    /// Record category (e.g. "thinking", "no_reply_reason")
    pub memory_type: String,

    /// The reasoning text itself
    pub content: String,

    /// Free-form context (context id, flush reason, token counts)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub recorded_at: DateTime<Utc>,
}

impl ThoughtRecord {
    pub fn new(memory_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            memory_type: memory_type.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Append-only sink for thought records.
#[async_trait]
pub trait ThoughtSink: Send + Sync {
    async fn record(&self, record: ThoughtRecord) -> std::result::Result<(), ThoughtLogError>;
}
