//! The uniform adapter capability contract (§4.3) every storage backend
//! implements, and the lifecycle objects it deals in (§3.4).

use async_trait::async_trait;
use tdtp_core::error::Result;
use tdtp_core::field::Schema;
use tdtp_core::packet::DataPacket;
use tdtp_core::query::Query;

/// Connection-pool knobs carried by every adapter's configuration record (§6).
#[derive(Debug, Clone)]
pub struct SslConfig {
    pub mode: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub ca_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub adapter_type: String,
    pub dsn: String,
    pub schema: Option<String>,
    pub timeout_ms: u64,
    pub max_conns: u32,
    pub min_conns: u32,
    pub ssl: Option<SslConfig>,
    pub compatibility_mode: Option<String>,
    pub strict_compatibility: bool,
    pub warn_on_incompatible: bool,
}

impl AdapterConfig {
    pub fn new(adapter_type: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            dsn: dsn.into(),
            schema: None,
            timeout_ms: 30_000,
            max_conns: 10,
            min_conns: 1,
            ssl: None,
            compatibility_mode: None,
            strict_compatibility: false,
            warn_on_incompatible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    Replace,
    Ignore,
    Fail,
    Copy,
}

impl ImportStrategy {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "replace" => Some(Self::Replace),
            "ignore" => Some(Self::Ignore),
            "fail" => Some(Self::Fail),
            "copy" => Some(Self::Copy),
            _ => None,
        }
    }
}

/// `{strategy, trackingField, batchSize, lastValue}` — drives
/// `Adapter::export_table_incremental` (§4.3).
#[derive(Debug, Clone)]
pub struct IncrementalConfig {
    pub strategy: String,
    pub tracking_field: String,
    pub batch_size: u64,
    pub last_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewInfo {
    pub name: String,
    pub updatable: bool,
}

/// A local two-phase transaction; consumed by exactly one of `commit`/`rollback`.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The uniform capability set every storage backend exposes (§4.3).
/// `async_trait`-based, mirroring the teacher's `Source`/`Transform`/`Sink`
/// operator traits' shape: a handful of metadata/lifecycle methods plus the
/// subsystem-specific async operations.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The factory key this instance was constructed under (must match
    /// `get_database_type`'s value).
    fn database_type(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    /// Cheap, non-mutating liveness check.
    async fn ping(&self) -> Result<()>;

    async fn get_table_names(&self) -> Result<Vec<String>>;
    async fn get_view_names(&self) -> Result<Vec<ViewInfo>>;
    async fn table_exists(&self, table: &str) -> Result<bool>;
    async fn get_table_schema(&self, table: &str) -> Result<Schema>;

    /// Full export, chunked to at most `max_rows_per_part`.
    async fn export_table(&self, table: &str, max_rows_per_part: usize) -> Result<Vec<DataPacket>>;

    /// Server-side translation of `query` into this adapter's native filter
    /// syntax; the returned packets' `QueryContext` reflects actual counters.
    async fn export_table_with_query(
        &self,
        table: &str,
        query: &Query,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<Vec<DataPacket>>;

    /// Returns the exported packets and the new checkpoint `lastValue`.
    async fn export_table_incremental(
        &self,
        table: &str,
        inc: &IncrementalConfig,
    ) -> Result<(Vec<DataPacket>, Option<String>)>;

    /// Creates the target table if absent (schema derived from the packet),
    /// then applies rows under `strategy` (§4.4).
    async fn import_packet(&self, packet: &DataPacket, strategy: ImportStrategy) -> Result<u64>;

    /// All-or-nothing import of multiple packets in one transaction.
    async fn import_packets(&self, packets: &[DataPacket], strategy: ImportStrategy) -> Result<u64>;

    async fn begin_tx(&self) -> Result<Box<dyn Transaction>>;

    async fn get_database_version(&self) -> Result<String>;
    fn get_database_type(&self) -> &str {
        self.database_type()
    }

    /// Feature query for backend-specific knobs (§9 "dynamic dispatch over
    /// adapters" — capabilities, not type-casts).
    fn supports_bulk_copy(&self) -> bool {
        false
    }
}
