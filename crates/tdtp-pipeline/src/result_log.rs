//! `PipelineResult` and its publisher contract (§6). The pub/sub + keyed
//! snapshot transport itself is an external collaborator (§1); `FilePublisher`
//! is the concrete reference backend, writing one JSON snapshot per
//! `result_name`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tdtp_core::error::{Result, TdtpError};
use uuid::Uuid;

const SUBSYSTEM: &str = "result_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
    CompletedWithErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline_name: String,
    pub result_name: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub package_uuid: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub rows_loaded: u64,
    pub rows_exported: u64,
    #[serde(default)]
    pub error: Option<String>,
    /// Which run stage produced `error` (`source`/`transform`/`output`/
    /// `encryption`), absent on success. Lets a CLI collaborator map a
    /// failed run onto the exit-code table (§6) without re-parsing `error`.
    #[serde(default)]
    pub failed_stage: Option<String>,
}

impl PipelineResult {
    pub fn duration(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> i64 {
        (finished_at - started_at).num_milliseconds()
    }
}

/// A backend that receives the terminal event of a pipeline run. Kept
/// trait-object-based so the engine doesn't depend on any specific
/// transport (file, HTTP, message bus).
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, result: &PipelineResult) -> Result<()>;
}

/// Writes one JSON file per `result_name`, overwritten on every publish —
/// the "keyed snapshot" half of §6's pub/sub + keyed-snapshot contract.
/// `ttl` is accepted for interface parity with networked backends but is
/// not enforced locally (a plain file has no expiry).
pub struct FilePublisher {
    dir: PathBuf,
}

impl FilePublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, result_name: &str) -> PathBuf {
        self.dir.join(format!("{result_name}.json"))
    }
}

#[async_trait]
impl ResultPublisher for FilePublisher {
    async fn publish(&self, result: &PipelineResult) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("creating result-log dir: {e}")))?;
        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("serializing pipeline result: {e}")))?;
        tokio::fs::write(self.path_for(&result.result_name), json)
            .await
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("writing pipeline result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_writes_one_file_per_result_name() {
        let dir = std::env::temp_dir().join(format!("tdtp-result-log-{}", Uuid::new_v4()));
        let publisher = FilePublisher::new(&dir);
        let now = Utc::now();
        let result = PipelineResult {
            pipeline_name: "customers-sync".to_string(),
            result_name: "customers-sync-run-1".to_string(),
            status: ResultStatus::Success,
            package_uuid: None,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            rows_loaded: 5,
            rows_exported: 5,
            error: None,
            failed_stage: None,
        };
        publisher.publish(&result).await.unwrap();
        assert!(dir.join("customers-sync-run-1.json").exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
