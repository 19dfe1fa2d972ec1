//! Process-wide adapter registry (§4.3, §9 "global registry"). Registration
//! is an explicit `register` call made at startup, not an init-time side
//! effect, mirroring the teacher's `create_transform`-style match dispatch
//! but made dynamic so hosts can add backends without touching this crate.

use crate::contract::{Adapter, AdapterConfig};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tdtp_core::error::{Result, TdtpError};

type Ctor = Arc<dyn Fn(&AdapterConfig) -> Result<Box<dyn Adapter>> + Send + Sync>;

/// `type -> constructor` registry. Connecting is a separate step
/// (`Adapter::connect`); the factory only builds the instance.
#[derive(Default)]
pub struct AdapterFactory {
    ctors: RwLock<HashMap<String, Ctor>>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self { ctors: RwLock::new(HashMap::new()) }
    }

    pub fn register<F>(&self, adapter_type: impl Into<String>, ctor: F)
    where
        F: Fn(&AdapterConfig) -> Result<Box<dyn Adapter>> + Send + Sync + 'static,
    {
        self.ctors
            .write()
            .expect("adapter factory lock poisoned")
            .insert(adapter_type.into(), Arc::new(ctor));
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> =
            self.ctors.read().expect("adapter factory lock poisoned").keys().cloned().collect();
        types.sort();
        types
    }

    /// Construct and connect a fresh adapter instance for `cfg.adapter_type`.
    pub async fn new_adapter(&self, cfg: &AdapterConfig) -> Result<Box<dyn Adapter>> {
        let ctor = {
            let ctors = self.ctors.read().expect("adapter factory lock poisoned");
            ctors.get(&cfg.adapter_type).cloned()
        };
        let ctor = ctor.ok_or_else(|| {
            TdtpError::fatal(
                "adapter_factory",
                format!(
                    "unknown adapter type '{}', registered types: [{}]",
                    cfg.adapter_type,
                    self.registered_types().join(", ")
                ),
            )
        })?;
        let mut adapter = ctor(cfg)?;
        adapter.connect().await?;
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_lists_registered_types_in_error() {
        let factory = AdapterFactory::new();
        factory.register("sqlite", |_cfg| {
            Err(TdtpError::fatal("test", "constructor should not run in this test"))
        });
        assert_eq!(factory.registered_types(), vec!["sqlite".to_string()]);
    }
}
