//! `tdtp-adapter` — the uniform storage-backend capability contract (§3.4,
//! §4.3), import-strategy semantics (§4.4), the process-wide factory
//! registry (§4.3, §9), incremental sync-state persistence (§3.5), and the
//! reference SQLite/CSV adapters.

pub mod contract;
pub mod csv_adapter;
pub mod factory;
pub mod sqlite;
pub mod sync_state;

pub use contract::{Adapter, AdapterConfig, ImportStrategy, IncrementalConfig, SslConfig, Transaction, ViewInfo};
pub use csv_adapter::CsvAdapter;
pub use factory::AdapterFactory;
pub use sqlite::SqliteAdapter;
pub use sync_state::{SyncState, SyncStateStore};

/// Builds a factory with the two reference backends pre-registered. Hosts
/// that need more backends call `factory.register(...)` before use.
pub fn default_factory() -> AdapterFactory {
    let factory = AdapterFactory::new();
    factory.register("sqlite", |cfg| Ok(Box::new(SqliteAdapter::new(cfg))));
    factory.register("csv", |cfg| Ok(Box::new(CsvAdapter::new(cfg))));
    factory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_factory_registers_both_reference_adapters() {
        let factory = default_factory();
        assert_eq!(factory.registered_types(), vec!["csv".to_string(), "sqlite".to_string()]);
    }
}
