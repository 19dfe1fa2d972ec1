//! `tdtp-ops` — packet diff/merge, the async-appender audit log, and the
//! safe-mode SQL validator (§4.8, §6, §9).

pub mod audit;
pub mod diff;
pub mod merge;
pub mod safe_sql;

pub use audit::{AuditEvent, AuditLevel, AuditLog, Appender, FileAppender, MemoryAppender};
pub use diff::{diff, DiffOptions, DiffResult};
pub use merge::{merge, MergeOptions, MergeStrategy};
pub use safe_sql::validate as validate_safe_sql;
