//! Durable message brokers
//!
//! A broker stores an append-only log per topic and a committed read cursor
//! per (topic, consumer). Each topic is a single totally ordered log, so
//! messages sharing a partition key are always read in publish order.
//!
//! Brokers are addressed by URL:
//!
//! - `memory://<name>` - [`MemoryBroker`], process-local
//! - `file:///path/to/dir` - [`FileBroker`], JSON lines on disk

pub mod file;
pub mod memory;

pub use file::FileBroker;
pub use memory::MemoryBroker;

use crate::domain::{ConduitError, InMemoryMessage, Result};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// A message together with its position in the topic log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub offset: u64,
    pub message: InMemoryMessage,
}

/// Append-only, cursor-based message log
#[async_trait]
pub trait Broker: Send + Sync {
    /// Address this broker was created from
    fn address(&self) -> &str;

    /// Appends a message and returns its offset
    async fn publish(&self, topic: &str, message: &InMemoryMessage) -> Result<u64>;

    /// Up to `max` records starting at the consumer's committed offset
    async fn poll(&self, topic: &str, consumer: &str, max: usize) -> Result<Vec<BrokerRecord>>;

    /// Moves the consumer's cursor to `next_offset`
    async fn commit(&self, topic: &str, consumer: &str, next_offset: u64) -> Result<()>;

    /// Records after the consumer's cursor
    async fn pending(&self, topic: &str, consumer: &str) -> Result<u64>;

    /// Moves the cursor past every pending record; returns how many were skipped
    async fn skip_to_end(&self, topic: &str, consumer: &str) -> Result<u64>;
}

/// Creates a broker from its address
///
/// # Errors
///
/// Returns a configuration error for malformed addresses or unknown schemes.
pub async fn connect(address: &str) -> Result<Arc<dyn Broker>> {
    let url = Url::parse(address).map_err(|e| {
        ConduitError::Configuration(format!("Invalid broker address '{address}': {e}"))
    })?;

    match url.scheme() {
        "memory" => {
            tracing::info!(address = %address, "Creating in-memory broker");
            Ok(Arc::new(MemoryBroker::new(address)))
        }
        "file" => {
            let path = url.to_file_path().map_err(|_| {
                ConduitError::Configuration(format!(
                    "Broker address '{address}' is not a local path"
                ))
            })?;
            tracing::info!(address = %address, path = %path.display(), "Opening file broker");
            Ok(Arc::new(FileBroker::open(address, path).await?))
        }
        other => Err(ConduitError::Configuration(format!(
            "Unsupported broker scheme '{other}' in '{address}'"
        ))),
    }
}

/// Topic names double as file names, so they are restricted
pub(crate) fn validate_topic(topic: &str) -> Result<()> {
    let valid = !topic.is_empty()
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ConduitError::Configuration(format!(
            "Invalid topic name '{topic}': use letters, digits, '.', '-' or '_'"
        )))
    }
}
