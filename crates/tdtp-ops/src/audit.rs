//! Audit log (§2 L6, §5, §9): an async-appender logger with a bounded
//! channel that falls back to synchronous writes when the channel is full,
//! so events are never dropped. The `Appender` trait decouples the logger
//! from adapters/pipeline (§9's cyclic-reference note) — it depends on
//! nothing beyond a byte sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tdtp_core::error::{Result, TdtpError};
use tokio::sync::mpsc;

const SUBSYSTEM: &str = "audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub pipeline: String,
    pub subsystem: String,
    pub level: AuditLevel,
    pub message: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

impl AuditEvent {
    pub fn new(pipeline: impl Into<String>, subsystem: impl Into<String>, level: AuditLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            pipeline: pipeline.into(),
            subsystem: subsystem.into(),
            level,
            message: message.into(),
            fields: serde_json::Value::Null,
        }
    }

    pub fn with_fields(mut self, fields: serde_json::Value) -> Self {
        self.fields = fields;
        self
    }
}

/// A sink for audit events. Implementations must be safe to call from a
/// blocking context (the synchronous fallback path) as well as from the
/// background appender task.
pub trait Appender: Send + Sync {
    fn append(&self, event: &AuditEvent) -> Result<()>;
}

/// File-based appender with size-triggered rotation: when the target file
/// would exceed `max_bytes`, it's renamed to `<path>.1` (clobbering any
/// previous `.1`) before the new line is written.
pub struct FileAppender {
    path: PathBuf,
    max_bytes: u64,
    file: Mutex<File>,
}

impl FileAppender {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("opening audit log '{}': {e}", path.display())))?;
        Ok(Self { path, max_bytes, file: Mutex::new(file) })
    }

    fn rotate_if_needed(&self, guard: &mut File, incoming_len: u64) -> Result<()> {
        let current_len = guard
            .metadata()
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("stat audit log: {e}")))?
            .len();
        if current_len + incoming_len <= self.max_bytes {
            return Ok(());
        }
        let rotated = rotated_path(&self.path);
        std::fs::rename(&self.path, &rotated).map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("rotating audit log: {e}")))?;
        *guard = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("reopening audit log: {e}")))?;
        Ok(())
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    PathBuf::from(rotated)
}

impl Appender for FileAppender {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("serializing audit event: {e}")))?;
        line.push('\n');

        let mut guard = self.file.lock().expect("audit log mutex poisoned");
        self.rotate_if_needed(&mut guard, line.len() as u64)?;
        guard
            .write_all(line.as_bytes())
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("writing audit event: {e}")))
    }
}

/// In-memory appender for tests and embedding scenarios that don't need
/// durable storage.
#[derive(Default)]
pub struct MemoryAppender {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAppender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit log mutex poisoned").clone()
    }
}

impl Appender for MemoryAppender {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().expect("audit log mutex poisoned").push(event.clone());
        Ok(())
    }
}

/// Async-appender audit log. `log` enqueues onto a bounded channel drained
/// by a background task; when the channel is full it writes synchronously
/// instead of blocking the caller's task or dropping the event.
pub struct AuditLog {
    appender: std::sync::Arc<dyn Appender>,
    sender: mpsc::Sender<AuditEvent>,
}

impl AuditLog {
    pub fn new(appender: std::sync::Arc<dyn Appender>, channel_capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(channel_capacity);
        let worker_appender = appender.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = worker_appender.append(&event) {
                    tracing::error!(error = %e, "audit appender failed to write event");
                }
            }
        });
        Self { appender, sender }
    }

    pub fn log(&self, event: AuditEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.sender.try_send(event) {
            tracing::warn!("audit channel full, falling back to synchronous write");
            if let Err(e) = self.appender.append(&event) {
                tracing::error!(error = %e, "synchronous audit fallback write failed");
            }
        }
    }

    pub fn info(&self, pipeline: &str, subsystem: &str, message: impl Into<String>) {
        self.log(AuditEvent::new(pipeline, subsystem, AuditLevel::Info, message));
    }

    pub fn warn(&self, pipeline: &str, subsystem: &str, message: impl Into<String>) {
        self.log(AuditEvent::new(pipeline, subsystem, AuditLevel::Warn, message));
    }

    pub fn error(&self, pipeline: &str, subsystem: &str, message: impl Into<String>) {
        self.log(AuditEvent::new(pipeline, subsystem, AuditLevel::Error, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn log_reaches_appender_through_the_background_task() {
        let appender = Arc::new(MemoryAppender::new());
        let log = AuditLog::new(appender.clone(), 8);
        log.info("p1", "adapter", "connected");
        // Give the background task a chance to drain the channel.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = appender.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "connected");
        assert_eq!(events[0].level, AuditLevel::Info);
    }

    #[test]
    fn file_appender_rotates_when_max_bytes_exceeded() {
        let dir = std::env::temp_dir().join(format!("tdtp-audit-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("audit.log");
        let appender = FileAppender::new(&path, 10).unwrap();

        appender.append(&AuditEvent::new("p1", "s1", AuditLevel::Info, "first event")).unwrap();
        appender.append(&AuditEvent::new("p1", "s1", AuditLevel::Info, "second event")).unwrap();

        assert!(rotated_path(&path).exists());
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
