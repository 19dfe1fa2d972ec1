//! The declarative pipeline executor (§4.5): acquire each source with the
//! resilience envelope applied, load the decoded rows into the embedded SQL
//! workspace, run the transform, mask/checksum/compress/encrypt the result,
//! hand it to the output adapter, then publish the terminal `PipelineResult`.
//!
//! Grounded on `bins/rde-cli/src/main.rs`'s `main` (build sources/transforms/
//! sink from a parsed spec, spawn, join), generalized from a channel-wired
//! task graph into a single sequential async method — §5 states pipeline
//! stages for a single run execute sequentially, there's no streaming
//! operator graph to wire here.

use crate::config::{
    NormalizeRuleConfig, OnSourceError, PipelineConfig, ProcessingConfig, SourceConfig,
};
use crate::processors::{
    CaseFold, ChecksumAlgo, ChecksumProcessor, CompressProcessor, MaskFieldRule, MaskProcessor,
    MaskRule, NormalizeFieldRule, NormalizeProcessor,
};
use crate::result_log::{PipelineResult, ResultPublisher, ResultStatus};
use crate::workspace::Workspace;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tdtp_adapter::{AdapterConfig, AdapterFactory, ImportStrategy, IncrementalConfig, SyncState, SyncStateStore};
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::field::Schema;
use tdtp_core::packet::{build_row, Data, DataPacket, PROTOCOL_TAG, PROTOCOL_VERSION};
use tdtp_core::header::{Header, PacketType};
use tdtp_envelope::{encrypt as envelope_encrypt, EnvelopeKey, KeyServiceClient};
use tdtp_ops::AuditLog;
use tdtp_resilience::{retry, CircuitBreaker, CircuitBreakerConfig, DeadLetterQueue, RetryConfig};
use uuid::Uuid;

const SUBSYSTEM: &str = "pipeline_engine";

/// Wiring the engine needs beyond the parsed config: the adapter registry,
/// an optional audit sink, an optional DLQ (required when
/// `on_source_error: dlq`), and the result publisher.
pub struct PipelineEngine {
    config: PipelineConfig,
    factory: Arc<AdapterFactory>,
    audit: Option<Arc<AuditLog>>,
    dlq: Option<Arc<DeadLetterQueue>>,
    publisher: Arc<dyn ResultPublisher>,
    retry_config: RetryConfig,
}

impl PipelineEngine {
    pub fn new(
        config: PipelineConfig,
        factory: Arc<AdapterFactory>,
        audit: Option<Arc<AuditLog>>,
        dlq: Option<Arc<DeadLetterQueue>>,
        publisher: Arc<dyn ResultPublisher>,
    ) -> Self {
        Self { config, factory, audit, dlq, publisher, retry_config: RetryConfig::default() }
    }

    fn audit_info(&self, subsystem: &'static str, message: impl Into<String>) {
        if let Some(audit) = &self.audit {
            audit.info(&self.config.name, subsystem, message);
        }
    }

    fn audit_warn(&self, subsystem: &'static str, message: impl Into<String>) {
        if let Some(audit) = &self.audit {
            audit.warn(&self.config.name, subsystem, message);
        }
    }

    fn key_service(&self) -> Result<KeyServiceClient> {
        let sec = &self.config.security;
        let url = sec
            .mercury_url
            .as_deref()
            .ok_or_else(|| TdtpError::fatal(SUBSYSTEM, "output.encrypt requires security.mercury_url"))?;
        let secret = sec
            .mercury_shared_secret
            .as_deref()
            .ok_or_else(|| TdtpError::fatal(SUBSYSTEM, "output.encrypt requires security.mercury_shared_secret"))?;
        KeyServiceClient::new(url, secret.as_bytes().to_vec(), Duration::from_millis(sec.mercury_timeout_ms))
    }

    /// Runs the whole pipeline once and returns the terminal result. Never
    /// returns `Err` for a source failure handled by `skip`/`dlq` — those are
    /// folded into `ResultStatus::CompletedWithErrors`. A transform or output
    /// failure is always fatal to the run, per §4.5.
    pub async fn run(&self) -> Result<PipelineResult> {
        let started_at = Utc::now();
        self.audit_info("engine", format!("starting pipeline run '{}'", self.config.name));

        let workspace = Workspace::new();
        let mut rows_loaded: u64 = 0;
        let mut had_source_errors = false;

        for source in &self.config.sources {
            match self.load_source(&workspace, source).await {
                Ok(n) => rows_loaded += n,
                Err(err) => {
                    had_source_errors = true;
                    match self.config.error_handling.on_source_error {
                        OnSourceError::Fail => {
                            return Ok(self.failure_result(started_at, rows_loaded, 0, "source", err).await);
                        }
                        OnSourceError::Skip => {
                            self.audit_warn("engine", format!("source '{}' skipped: {err}", source.name));
                        }
                        OnSourceError::Dlq => {
                            self.audit_warn("engine", format!("source '{}' sent to DLQ: {err}", source.name));
                            if let Some(dlq) = &self.dlq {
                                dlq.append("source_error", 1, err.to_string(), source.name.clone())?;
                            } else {
                                return Ok(self.failure_result(started_at, rows_loaded, 0, "source", err).await);
                            }
                        }
                    }
                }
            }
        }

        if self.config.security.safe_mode {
            if let Err(err) = tdtp_ops::validate_safe_sql(&self.config.transform.sql) {
                return Ok(self.failure_result(started_at, rows_loaded, 0, "transform", err).await);
            }
        }

        let (result_schema, mut result_rows) = match workspace.execute(&self.config.transform.sql).await {
            Ok(v) => v,
            Err(err) => return Ok(self.failure_result(started_at, rows_loaded, 0, "transform", err).await),
        };

        if let Some(algo) = checksum_algo(&self.config.processing) {
            let encoded_rows: Vec<String> =
                result_rows.iter().map(|r| build_row(r)).collect::<Vec<_>>();
            let digest = ChecksumProcessor { algo }.digest(&encoded_rows);
            self.audit_info("engine", format!("result checksum ({algo:?}): {digest}"));
        }

        if let Err(err) = apply_mask(&self.config.processing, &result_schema, &mut result_rows) {
            return Ok(self.failure_result(started_at, rows_loaded, 0, "transform", err).await);
        }

        let rows_exported = result_rows.len() as u64;
        let package_uuid = Uuid::new_v4();
        let result_packet = match self.build_result_packet(&result_schema, &result_rows, package_uuid) {
            Ok(p) => p,
            Err(err) => return Ok(self.failure_result(started_at, rows_loaded, 0, "transform", err).await),
        };

        if let Err(err) = self.send_output(&result_packet).await {
            let stage = error_stage(&err, "output");
            return Ok(self.failure_result(started_at, rows_loaded, rows_exported, stage, err).await);
        }

        let status = if had_source_errors { ResultStatus::CompletedWithErrors } else { ResultStatus::Success };
        let result = self
            .finish(started_at, status, Some(package_uuid), rows_loaded, rows_exported, None, None)
            .await;
        self.audit_info("engine", format!("pipeline run '{}' finished: {:?}", self.config.name, result.status));
        Ok(result)
    }

    /// Acquires one source (with circuit breaker + retry), exports its rows
    /// (incremental or full), and registers them as a workspace table.
    /// Returns the number of rows loaded.
    async fn load_source(&self, workspace: &Workspace, source: &SourceConfig) -> Result<u64> {
        let adapter_cfg = AdapterConfig::new(source.adapter_type.clone(), source.dsn.clone());
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let factory = self.factory.clone();
        let adapter = breaker
            .call(|| {
                let factory = factory.clone();
                let adapter_cfg = adapter_cfg.clone();
                async move {
                    retry(&self.retry_config, None, || {
                        let factory = factory.clone();
                        let adapter_cfg = adapter_cfg.clone();
                        async move { factory.new_adapter(&adapter_cfg).await }
                    })
                    .await
                }
            })
            .await?;

        let table = source.name.as_str();

        let (schema, rows) = if let Some(inc) = source.incremental.as_ref().filter(|i| i.enabled) {
            let store = SyncStateStore::new(PathBuf::from(&inc.state_file));
            let state = store.get(&self.config.name, table)?;
            let inc_cfg = IncrementalConfig {
                strategy: inc.strategy.clone(),
                tracking_field: inc.tracking_field.clone(),
                batch_size: inc.batch_size as u64,
                last_value: state.last_value,
            };
            let (packets, new_last_value) = adapter.export_table_incremental(table, &inc_cfg).await?;
            let (schema, rows) = flatten_packets(&packets)?;
            store.put(
                &self.config.name,
                table,
                SyncState {
                    last_value: new_last_value,
                    last_sync_time: Some(Utc::now()),
                    records_exported: rows.len() as u64,
                    last_error: None,
                },
            )?;
            (schema, rows)
        } else if let Some(tdtql) = &source.query {
            let query = tdtp_query::translate(tdtql)
                .map_err(|e| TdtpError::validation(SUBSYSTEM, format!("source '{}' query: {e}", source.name)))?;
            let packets = adapter.export_table_with_query(table, &query, None, None).await?;
            flatten_packets(&packets)?
        } else {
            let packets = adapter.export_table(table, usize::MAX).await?;
            flatten_packets(&packets)?
        };

        let mut rows = rows;
        apply_normalize(&self.config.processing, &schema, &mut rows)?;

        let row_count = rows.len() as u64;
        workspace.register_source(&source.name, &schema, &rows)?;
        Ok(row_count)
    }

    fn build_result_packet(&self, schema: &Schema, rows: &[Vec<String>], package_uuid: Uuid) -> Result<DataPacket> {
        let encoded: Vec<String> = rows.iter().map(|r| build_row(r)).collect();
        let data = if self.config.output.compress {
            CompressProcessor.compress(&encoded)?
        } else {
            Data::uncompressed(encoded)
        };
        Ok(DataPacket {
            protocol: PROTOCOL_TAG.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            header: Header {
                packet_type: PacketType::Reference,
                table_name: self.config.transform.result_table.clone(),
                message_id: Uuid::new_v4().to_string(),
                in_reply_to: None,
                part_number: 1,
                total_parts: 1,
                records_in_part: rows.len() as u32,
                timestamp: Utc::now(),
                sender: Some(self.config.name.clone()),
                recipient: None,
            },
            schema: schema.clone(),
            data,
            query: None,
            query_context: None,
            uuid: package_uuid,
        })
    }

    /// Either hands the packet to a registered storage adapter, or — for a
    /// `file` output — writes its (optionally encrypted) bytes directly.
    /// `encrypt` only applies to `file` outputs: an adapter import needs
    /// typed rows it can parse, not ciphertext, so encryption there would
    /// have no reader on the other end (resolved Open Question, see DESIGN.md).
    async fn send_output(&self, packet: &DataPacket) -> Result<()> {
        if self.config.output.output_type == "file" {
            let path = self
                .config
                .output
                .config
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| TdtpError::validation(SUBSYSTEM, "file output requires a 'path' field"))?;
            let mut bytes = packet.data.rows.join("\n").into_bytes();
            if self.config.output.encrypt {
                let key_service = self.key_service()?;
                let raw_key = key_service.bind(packet.uuid, &self.config.name).await?;
                let key: EnvelopeKey = raw_key
                    .try_into()
                    .map_err(|_| TdtpError::fatal(SUBSYSTEM, "key service returned a key of unexpected length"))?;
                bytes = envelope_encrypt(&key, &bytes, packet.uuid)?;
            }
            std::fs::write(path, bytes)
                .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("writing output file '{path}': {e}")))?;
            return Ok(());
        }

        if self.config.output.encrypt {
            self.audit_warn("engine", "output.encrypt is ignored for adapter-backed outputs");
        }

        let dsn = self
            .config
            .output
            .config
            .get("dsn")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TdtpError::validation(SUBSYSTEM, "adapter output requires a 'dsn' field"))?;
        let adapter_cfg = AdapterConfig::new(self.config.output.output_type.clone(), dsn.to_string());
        let adapter = self.factory.new_adapter(&adapter_cfg).await?;
        adapter.import_packet(packet, ImportStrategy::Replace).await?;
        Ok(())
    }

    async fn failure_result(
        &self,
        started_at: chrono::DateTime<Utc>,
        rows_loaded: u64,
        rows_exported: u64,
        stage: &'static str,
        err: TdtpError,
    ) -> PipelineResult {
        self.audit_warn("engine", format!("pipeline run '{}' failed at {stage}: {err}", self.config.name));
        self.finish(
            started_at,
            ResultStatus::Failed,
            None,
            rows_loaded,
            rows_exported,
            Some(err.to_string()),
            Some(stage.to_string()),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        started_at: chrono::DateTime<Utc>,
        status: ResultStatus,
        package_uuid: Option<Uuid>,
        rows_loaded: u64,
        rows_exported: u64,
        error: Option<String>,
        failed_stage: Option<String>,
    ) -> PipelineResult {
        let finished_at = Utc::now();
        let result = PipelineResult {
            pipeline_name: self.config.name.clone(),
            result_name: self.config.result_log.name.clone(),
            status,
            package_uuid,
            started_at,
            finished_at,
            duration_ms: PipelineResult::duration(started_at, finished_at),
            rows_loaded,
            rows_exported,
            error,
            failed_stage,
        };
        if let Err(e) = self.publisher.publish(&result).await {
            self.audit_warn("engine", format!("failed to publish pipeline result: {e}"));
        }
        result
    }
}

/// Recovers the originating subsystem from any `TdtpError` variant and maps
/// key-service/envelope failures onto the `encryption` stage regardless of
/// where in `send_output` they were raised, so the CLI's exit-code mapping
/// (§6) can tell a ciphertext/HMAC failure apart from a plain adapter error.
fn error_stage(err: &TdtpError, default_stage: &'static str) -> &'static str {
    let subsystem = match err {
        TdtpError::Validation { subsystem, .. }
        | TdtpError::Transient { subsystem, .. }
        | TdtpError::Resource { subsystem, .. }
        | TdtpError::Permission { subsystem, .. }
        | TdtpError::Integrity { subsystem, .. }
        | TdtpError::Fatal { subsystem, .. } => *subsystem,
    };
    if subsystem == "key_service" || subsystem == "envelope" {
        "encryption"
    } else {
        default_stage
    }
}

fn flatten_packets(packets: &[DataPacket]) -> Result<(Schema, Vec<Vec<String>>)> {
    let schema = packets
        .first()
        .map(|p| p.schema.clone())
        .ok_or_else(|| TdtpError::validation(SUBSYSTEM, "source produced no packets"))?;
    let mut rows = Vec::new();
    for packet in packets {
        rows.extend(packet.row_values()?);
    }
    Ok((schema, rows))
}

fn apply_normalize(processing: &ProcessingConfig, schema: &Schema, rows: &mut [Vec<String>]) -> Result<()> {
    if processing.normalize.is_empty() {
        return Ok(());
    }
    let processor = NormalizeProcessor { rules: processing.normalize.iter().map(to_normalize_rule).collect::<Result<_>>()? };
    processor.apply(schema, rows)
}

fn apply_mask(processing: &ProcessingConfig, schema: &Schema, rows: &mut [Vec<String>]) -> Result<()> {
    if processing.mask.is_empty() {
        return Ok(());
    }
    let rules = processing
        .mask
        .iter()
        .map(|m| {
            Ok(MaskFieldRule {
                field: m.field.clone(),
                rule: match m.rule.as_str() {
                    "partial" => MaskRule::Partial,
                    "middle" => MaskRule::Middle,
                    "first2_last2" => MaskRule::First2Last2,
                    other => return Err(TdtpError::validation(SUBSYSTEM, format!("unknown mask rule '{other}'"))),
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;
    MaskProcessor { rules }.apply(schema, rows)
}

fn to_normalize_rule(cfg: &NormalizeRuleConfig) -> Result<NormalizeFieldRule> {
    let case = match cfg.case.as_deref() {
        None => None,
        Some("lower") => Some(CaseFold::Lower),
        Some("upper") => Some(CaseFold::Upper),
        Some("title") => Some(CaseFold::Title),
        Some(other) => return Err(TdtpError::validation(SUBSYSTEM, format!("unknown normalize case '{other}'"))),
    };
    Ok(NormalizeFieldRule { field: cfg.field.clone(), trim: cfg.trim, case })
}

fn checksum_algo(processing: &ProcessingConfig) -> Option<ChecksumAlgo> {
    match processing.checksum.as_deref() {
        Some("crc32") => Some(ChecksumAlgo::Crc32),
        Some("sha256") => Some(ChecksumAlgo::Sha256),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ErrorHandlingConfig, OutputConfig, ResultLogConfig, SecurityConfig, TransformConfig, WorkspaceConfig};
    use crate::result_log::FilePublisher;
    use async_trait::async_trait;
    use tdtp_adapter::{contract::{Transaction, ViewInfo}, Adapter};
    use tdtp_core::field::Field;
    use tdtp_core::query::Query;
    use tdtp_core::value::TdtpType;

    struct StaticAdapter {
        schema: Schema,
        rows: Vec<String>,
    }

    #[async_trait]
    impl Adapter for StaticAdapter {
        fn database_type(&self) -> &str {
            "static"
        }
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn get_table_names(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn get_view_names(&self) -> Result<Vec<ViewInfo>> {
            Ok(vec![])
        }
        async fn table_exists(&self, _table: &str) -> Result<bool> {
            Ok(true)
        }
        async fn get_table_schema(&self, _table: &str) -> Result<Schema> {
            Ok(self.schema.clone())
        }
        async fn export_table(&self, _table: &str, _max_rows_per_part: usize) -> Result<Vec<DataPacket>> {
            Ok(vec![DataPacket {
                protocol: PROTOCOL_TAG.to_string(),
                version: PROTOCOL_VERSION.to_string(),
                header: Header {
                    packet_type: PacketType::Reference,
                    table_name: "customers".to_string(),
                    message_id: Uuid::new_v4().to_string(),
                    in_reply_to: None,
                    part_number: 1,
                    total_parts: 1,
                    records_in_part: self.rows.len() as u32,
                    timestamp: Utc::now(),
                    sender: None,
                    recipient: None,
                },
                schema: self.schema.clone(),
                data: Data::uncompressed(self.rows.clone()),
                query: None,
                query_context: None,
                uuid: Uuid::new_v4(),
            }])
        }
        async fn export_table_with_query(
            &self,
            table: &str,
            _query: &Query,
            _sender: Option<&str>,
            _recipient: Option<&str>,
        ) -> Result<Vec<DataPacket>> {
            self.export_table(table, usize::MAX).await
        }
        async fn export_table_incremental(
            &self,
            table: &str,
            _inc: &IncrementalConfig,
        ) -> Result<(Vec<DataPacket>, Option<String>)> {
            Ok((self.export_table(table, usize::MAX).await?, None))
        }
        async fn import_packet(&self, _packet: &DataPacket, _strategy: ImportStrategy) -> Result<u64> {
            Ok(self.rows.len() as u64)
        }
        async fn import_packets(&self, packets: &[DataPacket], strategy: ImportStrategy) -> Result<u64> {
            let mut total = 0;
            for p in packets {
                total += self.import_packet(p, strategy).await?;
            }
            Ok(total)
        }
        async fn begin_tx(&self) -> Result<Box<dyn Transaction>> {
            Err(TdtpError::fatal("test", "transactions not supported"))
        }
        async fn get_database_version(&self) -> Result<String> {
            Ok("1.0".to_string())
        }
    }

    fn sample_config() -> PipelineConfig {
        PipelineConfig {
            name: "customers-sync".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            sources: vec![SourceConfig {
                name: "customers".to_string(),
                adapter_type: "static".to_string(),
                dsn: "n/a".to_string(),
                query: None,
                incremental: None,
            }],
            workspace: WorkspaceConfig { workspace_type: "embedded".to_string(), mode: "memory".to_string() },
            transform: TransformConfig {
                result_table: "result".to_string(),
                sql: "SELECT * FROM customers".to_string(),
            },
            output: OutputConfig {
                output_type: "file".to_string(),
                config: serde_json::json!({ "path": std::env::temp_dir().join(format!("tdtp-engine-test-{}.txt", Uuid::new_v4())).to_string_lossy() }),
                compress: false,
                encrypt: false,
            },
            security: SecurityConfig::default(),
            error_handling: ErrorHandlingConfig::default(),
            result_log: ResultLogConfig {
                log_type: "file".to_string(),
                address: std::env::temp_dir().to_string_lossy().to_string(),
                name: "customers-sync-run".to_string(),
                ttl: None,
            },
            processing: ProcessingConfig::default(),
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", TdtpType::Integer).with_key(true), Field::new("name", TdtpType::Text)]).unwrap()
    }

    #[tokio::test]
    async fn runs_end_to_end_with_a_static_source_and_file_output() {
        let config = sample_config();
        let factory = Arc::new(AdapterFactory::new());
        let schema = schema();
        let rows = vec!["1|John".to_string(), "2|Jane".to_string()];
        factory.register("static", move |_cfg| {
            Ok(Box::new(StaticAdapter { schema: schema.clone(), rows: rows.clone() }) as Box<dyn Adapter>)
        });

        let publish_dir = std::env::temp_dir().join(format!("tdtp-engine-results-{}", Uuid::new_v4()));
        let publisher = Arc::new(FilePublisher::new(&publish_dir));
        let engine = PipelineEngine::new(config, factory, None, None, publisher);

        let result = engine.run().await.unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.rows_loaded, 2);
        assert_eq!(result.rows_exported, 2);
        tokio::fs::remove_dir_all(&publish_dir).await.ok();
    }
}
