//! Per-(table, pipeline) incremental-export checkpoint (§3.5), persisted as a
//! single JSON file with atomic write-then-rename semantics. The pipeline is
//! the only mutator, and only after a successful import of the batch that
//! produced the new `lastValue`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tdtp_core::error::{Result, TdtpError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub last_value: Option<String>,
    #[serde(default)]
    pub last_sync_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub records_exported: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Keyed by `"{pipeline}:{table}"`; one file backs every key a pipeline owns.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(flatten)]
    entries: HashMap<String, SyncState>,
}

fn key(pipeline: &str, table: &str) -> String {
    format!("{pipeline}:{table}")
}

/// Reads/writes a single JSON state file. Not internally lock-guarded across
/// processes — §3.5 leaves concurrent writers to the same file undefined;
/// within one process, callers should serialize access to one instance.
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<StateFile> {
        if !self.path.exists() {
            return Ok(StateFile::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| TdtpError::fatal("sync_state", format!("reading {}: {e}", self.path.display())))?;
        if raw.trim().is_empty() {
            return Ok(StateFile::default());
        }
        serde_json::from_str(&raw)
            .map_err(|e| TdtpError::fatal("sync_state", format!("parsing {}: {e}", self.path.display())))
    }

    fn save(&self, file: &StateFile) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("sync_state")
        ));
        let body = serde_json::to_string_pretty(file)
            .map_err(|e| TdtpError::fatal("sync_state", format!("serializing state: {e}")))?;
        std::fs::write(&tmp, body)
            .map_err(|e| TdtpError::fatal("sync_state", format!("writing {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TdtpError::fatal("sync_state", format!("renaming into {}: {e}", self.path.display())))?;
        Ok(())
    }

    pub fn get(&self, pipeline: &str, table: &str) -> Result<SyncState> {
        let file = self.load()?;
        Ok(file.entries.get(&key(pipeline, table)).cloned().unwrap_or_default())
    }

    /// Atomically replaces the entry for `(pipeline, table)`, called only
    /// after the batch that produced `state.lastValue` imported successfully.
    pub fn put(&self, pipeline: &str, table: &str, state: SyncState) -> Result<()> {
        let mut file = self.load()?;
        file.entries.insert(key(pipeline, table), state);
        self.save(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn missing_file_yields_default_state() {
        let dir = std::env::temp_dir().join(format!("tdtp-sync-state-test-{}", uuid::Uuid::new_v4()));
        let store = SyncStateStore::new(dir.join("state.json"));
        let state = store.get("orders_pipeline", "orders").unwrap();
        assert!(state.last_value.is_none());
        assert_eq!(state.records_exported, 0);
    }

    #[test]
    fn put_then_get_round_trips_and_is_keyed_per_table() {
        let dir = std::env::temp_dir().join(format!("tdtp-sync-state-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = SyncStateStore::new(dir.join("state.json"));

        let state = SyncState {
            last_value: Some("2024-01-01T02:00:00Z".to_string()),
            last_sync_time: Some(Utc::now()),
            records_exported: 3,
            last_error: None,
        };
        store.put("orders_pipeline", "orders", state.clone()).unwrap();

        let reloaded = store.get("orders_pipeline", "orders").unwrap();
        assert_eq!(reloaded.last_value, state.last_value);
        assert_eq!(reloaded.records_exported, 3);

        let other_table = store.get("orders_pipeline", "customers").unwrap();
        assert!(other_table.last_value.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
