//! Output resources
//!
//! An [`OutputResource`] is the physical destination of an export: a file, an
//! in-memory buffer, or anything a caller registers in the
//! [`OutputRegistry`]. Format generators write serialized records into it.

pub mod file;
pub mod memory;

pub use file::FileOutput;
pub use memory::{MemoryOutput, MemoryOutputStore};

use crate::config::DestinationConfig;
use crate::domain::{ConduitError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Physical destination of one export part
#[async_trait]
pub trait OutputResource: Send {
    /// Opens the resource under `name`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for settings the resource cannot honor
    /// (e.g. an encryption id) and a destination error for I/O failures.
    async fn open(&mut self, destination: &DestinationConfig, name: &str) -> Result<()>;

    /// Raw byte sink, for callers that stream pre-serialized content
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Unsupported`] when the resource has no stream.
    fn output_stream(&mut self) -> Result<&mut (dyn AsyncWrite + Send + Unpin)>;

    /// Writes one serialized record
    async fn write(&mut self, data: &[u8], partition_key: &str, record_key: &str) -> Result<()>;

    /// Flushes and releases the resource
    async fn close(&mut self) -> Result<()>;

    /// Name actually used, when it differs from the requested one
    fn effective_name(&self) -> Option<String> {
        None
    }

    /// Bytes written, when known
    fn size(&self) -> Option<u64> {
        None
    }
}

/// Rejects encryption ids on resources that cannot encrypt
pub(crate) fn reject_encryption(kind: &str, destination: &DestinationConfig) -> Result<()> {
    match &destination.encryption_id {
        Some(id) => Err(ConduitError::Configuration(format!(
            "destination '{}': {kind} output cannot honor encryption id '{id}'",
            destination.id
        ))),
        None => Ok(()),
    }
}

type OutputFactory = Arc<dyn Fn() -> Box<dyn OutputResource> + Send + Sync>;

/// Map-based output factory keyed by the destination's `output` field
#[derive(Clone)]
pub struct OutputRegistry {
    factories: HashMap<String, OutputFactory>,
    memory: MemoryOutputStore,
}

impl OutputRegistry {
    /// Registry with `file` and `memory` outputs
    pub fn with_defaults() -> Self {
        let memory = MemoryOutputStore::default();
        let mut registry = Self {
            factories: HashMap::new(),
            memory: memory.clone(),
        };
        registry.register("file", || Box::new(FileOutput::new()));
        registry.register("memory", move || Box::new(MemoryOutput::new(memory.clone())));
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn OutputResource> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Instantiates an output resource
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown kinds.
    pub fn create(&self, kind: &str) -> Result<Box<dyn OutputResource>> {
        self.factories
            .get(kind)
            .map(|factory| factory())
            .ok_or_else(|| ConduitError::Configuration(format!("Unknown output type '{kind}'")))
    }

    /// Contents written by `memory` outputs created from this registry
    pub fn memory_store(&self) -> &MemoryOutputStore {
        &self.memory
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_output_kind() {
        let registry = OutputRegistry::with_defaults();
        assert!(registry.create("ftp").is_err());
        assert!(registry.create("file").is_ok());
        assert!(registry.create("memory").is_ok());
    }
}
