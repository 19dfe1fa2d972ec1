//! Dead-letter queue (§4.6): a bounded JSON-file append log. Mutex-guarded
//! with an O(n) size-cap eviction that runs under the write lock (§5); no
//! background timer task — retention is applied lazily on overflow (§9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tdtp_core::error::{Result, TdtpError};

const SUBSYSTEM: &str = "dlq";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: u64,
    pub failure_type: String,
    pub attempts: u32,
    pub last_error: String,
    /// An opaque reference to the payload that failed (e.g. a packet UUID or
    /// a file path) — the DLQ never embeds the raw payload itself.
    pub payload_ref: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct DlqFile {
    next_id: u64,
    entries: Vec<DlqEntry>,
}

pub struct DeadLetterQueue {
    path: PathBuf,
    max_entries: usize,
    retention: chrono::Duration,
    state: Mutex<DlqFile>,
}

impl DeadLetterQueue {
    pub fn open(path: impl Into<PathBuf>, max_entries: usize, retention: chrono::Duration) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("reading {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                DlqFile::default()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("parsing {}: {e}", path.display())))?
            }
        } else {
            DlqFile::default()
        };
        Ok(Self { path, max_entries, retention, state: Mutex::new(state) })
    }

    fn save(&self, file: &DlqFile) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("dlq")
        ));
        let body = serde_json::to_string_pretty(file)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("serializing DLQ: {e}")))?;

        let mut f = File::create(&tmp)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("creating {}: {e}", tmp.display())))?;
        f.write_all(body.as_bytes())
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("writing {}: {e}", tmp.display())))?;
        f.sync_all().map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("fsync {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("renaming into {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Applies the retention window then, if still over `max_entries`,
    /// evicts the oldest entries until back at capacity. O(n) in entry count.
    fn evict(&self, file: &mut DlqFile) {
        let cutoff = Utc::now() - self.retention;
        file.entries.retain(|e| e.recorded_at >= cutoff);
        if file.entries.len() > self.max_entries {
            let overflow = file.entries.len() - self.max_entries;
            file.entries.drain(0..overflow);
        }
    }

    pub fn append(&self, failure_type: impl Into<String>, attempts: u32, last_error: impl Into<String>, payload_ref: impl Into<String>) -> Result<u64> {
        let mut file = self.state.lock().expect("DLQ lock poisoned");
        let id = file.next_id;
        file.next_id += 1;
        file.entries.push(DlqEntry {
            id,
            failure_type: failure_type.into(),
            attempts,
            last_error: last_error.into(),
            payload_ref: payload_ref.into(),
            recorded_at: Utc::now(),
        });
        self.evict(&mut file);
        self.save(&file)?;
        Ok(id)
    }

    pub fn entries(&self) -> Vec<DlqEntry> {
        self.state.lock().expect("DLQ lock poisoned").entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("DLQ lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("tdtp-dlq-test-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn append_assigns_monotonic_ids_and_persists() {
        let path = temp_path();
        let dlq = DeadLetterQueue::open(&path, 10, chrono::Duration::days(7)).unwrap();
        let a = dlq.append("import_failure", 3, "constraint violation", "pkt-1").unwrap();
        let b = dlq.append("import_failure", 1, "timeout", "pkt-2").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(dlq.len(), 2);

        let reopened = DeadLetterQueue::open(&path, 10, chrono::Duration::days(7)).unwrap();
        assert_eq!(reopened.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn size_cap_evicts_oldest_entries() {
        let path = temp_path();
        let dlq = DeadLetterQueue::open(&path, 2, chrono::Duration::days(7)).unwrap();
        dlq.append("t", 1, "e1", "p1").unwrap();
        dlq.append("t", 1, "e2", "p2").unwrap();
        dlq.append("t", 1, "e3", "p3").unwrap();

        let entries = dlq.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload_ref, "p2");
        assert_eq!(entries[1].payload_ref, "p3");
        std::fs::remove_file(&path).ok();
    }
}
