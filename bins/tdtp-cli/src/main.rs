//! `tdtp-cli` — runs one declarative pipeline (§4.5, §6) from a YAML
//! configuration file and exits with the documented exit-code table.
//!
//! Grounded on `bins/rde-cli/src/main.rs`: `clap::Parser` argument struct,
//! `tracing_subscriber::registry()` init, `#[tokio::main]` entry point, and
//! a Ctrl-C listener racing the pipeline's own completion. The teacher spawns
//! one task per operator and joins them all; a TDTP pipeline run is a single
//! sequential `PipelineEngine::run()` call (§4.5), so there is one task here
//! instead of a fan-out of source/transform/sink tasks.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tdtp_adapter::default_factory;
use tdtp_ops::{AuditLog, FileAppender};
use tdtp_pipeline::{FilePublisher, PipelineConfig, PipelineEngine, ResultStatus};
use tdtp_resilience::DeadLetterQueue;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_SOURCE_ERROR: i32 = 2;
const EXIT_TRANSFORM_OUTPUT_ERROR: i32 = 3;
const EXIT_ENCRYPTION_ERROR: i32 = 4;

/// Command-line arguments for the pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "tdtp-cli")]
#[command(about = "Runs a TDTP declarative pipeline from a YAML configuration file")]
struct Args {
    /// Path to the pipeline YAML configuration file.
    #[arg(short, long)]
    pipeline: PathBuf,

    /// Directory audit log entries are appended to. Disabled if omitted.
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Max bytes an audit log file grows to before rotation.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    audit_log_max_bytes: u64,

    /// Dead-letter queue file, required when a source uses
    /// `error_handling.on_source_error: dlq`.
    #[arg(long)]
    dlq_path: Option<PathBuf>,

    /// Max entries the dead-letter queue retains before evicting the oldest.
    #[arg(long, default_value_t = 10_000)]
    dlq_max_entries: usize,

    /// Retention window (days) for dead-letter queue entries.
    #[arg(long, default_value_t = 30)]
    dlq_retention_days: i64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match load_config(&args.pipeline) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let factory = Arc::new(default_factory());

    let audit = match build_audit_log(&args) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let dlq = match build_dlq(&args) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let result_dir = PathBuf::from(&config.result_log.address);
    let publisher = Arc::new(FilePublisher::new(result_dir));

    let engine = PipelineEngine::new(config, factory, audit, dlq, publisher);

    let cancel = tokio::signal::ctrl_c();
    tokio::pin!(cancel);
    let run = engine.run();
    tokio::pin!(run);

    let outcome = tokio::select! {
        _ = &mut cancel => {
            tracing::warn!("received Ctrl-C, pipeline run aborted before completion");
            std::process::exit(EXIT_TRANSFORM_OUTPUT_ERROR);
        }
        result = &mut run => result,
    };

    match outcome {
        Ok(result) => {
            match result.status {
                ResultStatus::Success => std::process::exit(EXIT_SUCCESS),
                ResultStatus::CompletedWithErrors => {
                    tracing::warn!("pipeline completed with source errors (skip/dlq)");
                    std::process::exit(EXIT_SOURCE_ERROR);
                }
                ResultStatus::Failed => {
                    let message = result.error.as_deref().unwrap_or("unknown error");
                    tracing::error!("pipeline run failed: {message}");
                    let code = match result.failed_stage.as_deref() {
                        Some("source") => EXIT_SOURCE_ERROR,
                        Some("encryption") => EXIT_ENCRYPTION_ERROR,
                        _ => EXIT_TRANSFORM_OUTPUT_ERROR,
                    };
                    std::process::exit(code);
                }
            }
        }
        Err(e) => {
            tracing::error!("pipeline run aborted: {e}");
            std::process::exit(EXIT_TRANSFORM_OUTPUT_ERROR);
        }
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

fn build_audit_log(args: &Args) -> anyhow::Result<Option<Arc<AuditLog>>> {
    let Some(dir) = &args.audit_log else {
        return Ok(None);
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join("audit.log.jsonl");
    let appender = FileAppender::new(path, args.audit_log_max_bytes)?;
    Ok(Some(Arc::new(AuditLog::new(Arc::new(appender), 1024))))
}

fn build_dlq(args: &Args) -> anyhow::Result<Option<Arc<DeadLetterQueue>>> {
    let Some(path) = &args.dlq_path else {
        return Ok(None);
    };
    let retention = chrono::Duration::days(args.dlq_retention_days);
    let dlq = DeadLetterQueue::open(path.clone(), args.dlq_max_entries, retention)?;
    Ok(Some(Arc::new(dlq)))
}
