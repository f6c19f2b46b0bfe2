//! In-memory output
//!
//! Buffers a part in memory and publishes it to a shared
//! [`MemoryOutputStore`] on close. Used for previews and tests.

use super::{reject_encryption, OutputResource};
use crate::config::DestinationConfig;
use crate::domain::context::ResultExt;
use crate::domain::{ConduitError, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWrite;

/// Closed parts by name
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputStore {
    parts: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryOutputStore {
    /// Content of a closed part
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().get(name).cloned()
    }

    /// Content of a closed part as UTF-8 text
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Names of all closed parts, sorted
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn insert(&self, name: String, bytes: Vec<u8>) {
        self.lock().insert(name, bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map still holds complete parts
        self.parts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Output that lands in a [`MemoryOutputStore`]
pub struct MemoryOutput {
    store: MemoryOutputStore,
    name: Option<String>,
    compress: bool,
    buffer: Vec<u8>,
    final_size: Option<u64>,
}

impl MemoryOutput {
    pub fn new(store: MemoryOutputStore) -> Self {
        Self {
            store,
            name: None,
            compress: false,
            buffer: Vec::new(),
            final_size: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.name.is_none() {
            return Err(ConduitError::Destination(
                "memory output is not open".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputResource for MemoryOutput {
    async fn open(&mut self, destination: &DestinationConfig, name: &str) -> Result<()> {
        reject_encryption("memory", destination)?;
        self.compress = destination.compress;
        self.name = Some(if self.compress && !name.ends_with(".gz") {
            format!("{name}.gz")
        } else {
            name.to_string()
        });
        self.buffer.clear();
        self.final_size = None;
        Ok(())
    }

    fn output_stream(&mut self) -> Result<&mut (dyn AsyncWrite + Send + Unpin)> {
        self.ensure_open()?;
        Ok(&mut self.buffer)
    }

    async fn write(&mut self, data: &[u8], _partition_key: &str, _record_key: &str) -> Result<()> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(name) = self.name.take() else {
            return Ok(());
        };

        let raw = std::mem::take(&mut self.buffer);
        let bytes = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw).context("gzip write")?;
            encoder.finish().context("gzip finish")?
        } else {
            raw
        };

        self.final_size = Some(bytes.len() as u64);
        self.store.insert(name.clone(), bytes);
        self.name = None;
        tracing::debug!(name = %name, size = self.final_size, "Closed memory output");
        Ok(())
    }

    fn effective_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn size(&self) -> Option<u64> {
        self.final_size
    }
}
