//! `PipelineConfig` — the YAML declarative document described in §6: one or
//! more sources, an embedded workspace, a transform, an output, and the
//! operational envelope (security, error handling, result log).

use serde::{Deserialize, Serialize};
use std::path::Path;
use tdtp_core::error::{Result, TdtpError};

const SUBSYSTEM: &str = "pipeline_config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub sources: Vec<SourceConfig>,
    pub workspace: WorkspaceConfig,
    pub transform: TransformConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    pub result_log: ResultLogConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub dsn: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub incremental: Option<IncrementalSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub mode: String,
    pub strategy: String,
    pub tracking_field: String,
    pub state_file: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(rename = "type", default = "default_workspace_type")]
    pub workspace_type: String,
    #[serde(default = "default_workspace_mode")]
    pub mode: String,
}

fn default_workspace_type() -> String {
    "embedded".to_string()
}

fn default_workspace_mode() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub result_table: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(flatten)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub encrypt: bool,
}

/// `security` block. spec.md §6 names only `mercury_url`/`key_ttl_seconds`/
/// `mercury_timeout_ms`; `safe_mode` and `mercury_shared_secret` are additive
/// fields recorded as resolved Open Questions in the grounding ledger — the
/// latter is the HMAC secret `KeyServiceClient` binds key requests under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub mercury_url: Option<String>,
    #[serde(default)]
    pub mercury_shared_secret: Option<String>,
    #[serde(default = "default_key_ttl_seconds")]
    pub key_ttl_seconds: u64,
    #[serde(default = "default_mercury_timeout_ms")]
    pub mercury_timeout_ms: u64,
    #[serde(default)]
    pub safe_mode: bool,
}

fn default_key_ttl_seconds() -> u64 {
    300
}

fn default_mercury_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnSourceError {
    Fail,
    Skip,
    Dlq,
}

impl Default for OnSourceError {
    fn default() -> Self {
        OnSourceError::Fail
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    #[serde(default)]
    pub on_source_error: OnSourceError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultLogConfig {
    #[serde(rename = "type")]
    pub log_type: String,
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Pre/post-processor configuration (SPEC_FULL §4.5 [ADD]). Absent from
/// spec.md's YAML schema; added so masking and normalization have somewhere
/// to be declared. Mask/normalize run on source rows before the workspace
/// load; checksum runs on the result rows after the transform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub mask: Vec<MaskRuleConfig>,
    #[serde(default)]
    pub normalize: Vec<NormalizeRuleConfig>,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRuleConfig {
    pub field: String,
    pub rule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRuleConfig {
    pub field: String,
    #[serde(default)]
    pub trim: bool,
    #[serde(default)]
    pub case: Option<String>,
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("invalid pipeline config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("reading pipeline config '{}': {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Structural checks beyond what serde enforces: at least one source,
    /// unique source names, and a non-empty transform SQL.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(TdtpError::validation(SUBSYSTEM, "pipeline must declare at least one source"));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(TdtpError::validation(SUBSYSTEM, format!("duplicate source name '{}'", source.name)));
            }
        }
        if self.transform.sql.trim().is_empty() {
            return Err(TdtpError::validation(SUBSYSTEM, "transform.sql must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
name: customers-sync
version: "1.0"
sources:
  - name: customers
    type: sqlite
    dsn: "file:customers.db"
workspace:
  type: embedded
  mode: memory
transform:
  result_table: result
  sql: "SELECT * FROM customers"
output:
  type: sqlite
  dsn: "file:out.db"
security:
  mercury_url: "http://localhost:9090"
  safe_mode: true
error_handling:
  on_source_error: skip
result_log:
  type: file
  address: "./result.json"
  name: customers-sync
"#
    }

    #[test]
    fn parses_minimal_config() {
        let cfg = PipelineConfig::from_yaml(sample_yaml()).unwrap();
        assert_eq!(cfg.name, "customers-sync");
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].adapter_type, "sqlite");
        assert!(cfg.security.safe_mode);
        assert_eq!(cfg.error_handling.on_source_error, OnSourceError::Skip);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_source_names() {
        let mut cfg = PipelineConfig::from_yaml(sample_yaml()).unwrap();
        let dup = cfg.sources[0].clone();
        cfg.sources.push(dup);
        assert!(cfg.validate().is_err());
    }
}
