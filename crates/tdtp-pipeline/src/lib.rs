//! `tdtp-pipeline` — the declarative pipeline engine (§2 L7, §4.5, §6):
//! YAML configuration, the embedded DataFusion workspace, pre/post row
//! processors, the result log, and the executor tying them together.

pub mod config;
pub mod engine;
pub mod processors;
pub mod result_log;
pub mod workspace;

pub use config::PipelineConfig;
pub use engine::PipelineEngine;
pub use result_log::{FilePublisher, PipelineResult, ResultPublisher, ResultStatus};
pub use workspace::Workspace;
