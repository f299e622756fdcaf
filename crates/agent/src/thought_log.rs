//! File-based thought sink — append-only NDJSON.
//!
//! One JSON object per line, field names fixed by the log contract
//! (`memoryType`, `content`, `metadata`, `recordedAt`). The file is
//! append-only; corrupted lines are skipped on read rather than failing
//! the whole log.

use async_trait::async_trait;
use chattermill_core::error::ThoughtLogError;
use chattermill_core::thought::{ThoughtRecord, ThoughtSink};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

/// Appends thought records to an NDJSON file.
pub struct FileThoughtSink {
    path: PathBuf,
    // Serializes appends so interleaved records cannot tear lines.
    lock: Mutex<()>,
}

impl FileThoughtSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Build from a configured path string, expanding a leading `~`.
    pub fn from_config_path(path: &str) -> Self {
        Self::new(expand_home(path))
    }

    /// Load every parseable record from an NDJSON file. Corrupted lines are
    /// skipped with a warning.
    pub fn read_records(path: &PathBuf) -> Vec<ThoughtRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ThoughtRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted thought record");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl ThoughtSink for FileThoughtSink {
    async fn record(&self, record: ThoughtRecord) -> Result<(), ThoughtLogError> {
        let line = serde_json::to_string(&record)?;

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ThoughtLogError::Io(format!("create {}: {e}", parent.display())))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ThoughtLogError::Io(format!("open {}: {e}", self.path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| ThoughtLogError::Io(format!("append {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "chattermill-thoughts-{name}-{}",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn records_append_as_ndjson_lines() {
        let path = temp_path("append");
        let _ = std::fs::remove_file(&path);
        let sink = FileThoughtSink::new(path.clone());

        sink.record(ThoughtRecord::new("thinking", "first"))
            .await
            .unwrap();
        sink.record(ThoughtRecord::new("thinking", "second"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().next().unwrap().contains("\"memoryType\":\"thinking\""));

        let records = FileThoughtSink::read_records(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "first");
        assert_eq!(records[1].content, "second");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped_on_read() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not valid json\n").unwrap();
        let sink = FileThoughtSink::new(path.clone());
        sink.record(ThoughtRecord::new("thinking", "good"))
            .await
            .unwrap();

        let records = FileThoughtSink::read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "good");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_reads_empty() {
        let path = temp_path("missing-never-created");
        assert!(FileThoughtSink::read_records(&path).is_empty());
    }

    #[test]
    fn home_expansion() {
        let expanded = expand_home("~/logs/thoughts.ndjson");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
