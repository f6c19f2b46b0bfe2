//! Directory-backed broker
//!
//! Layout under the broker directory:
//!
//! ```text
//! <topic>.log                 one JSON-encoded message per line
//! <topic>@<consumer>.offset   committed cursor, decimal text
//! ```
//!
//! Topics are loaded into memory on first use; writes go to disk before the
//! in-memory view is updated, so a restarted process resumes from the last
//! committed cursor.

use super::memory::TopicLog;
use super::{validate_topic, Broker, BrokerRecord};
use crate::domain::{ConduitError, InMemoryMessage, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Broker persisting topics as JSON lines
#[derive(Debug)]
pub struct FileBroker {
    address: String,
    root: PathBuf,
    topics: Mutex<HashMap<String, TopicLog>>,
}

impl FileBroker {
    /// Opens (and creates if needed) the broker directory
    pub async fn open(address: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            ConduitError::Delivery(format!(
                "Failed to create broker directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            address: address.into(),
            root,
            topics: Mutex::new(HashMap::new()),
        })
    }

    fn log_path(&self, topic: &str) -> PathBuf {
        self.root.join(format!("{topic}.log"))
    }

    fn offset_path(&self, topic: &str, consumer: &str) -> PathBuf {
        self.root.join(format!("{topic}@{consumer}.offset"))
    }

    async fn load_topic(&self, topic: &str) -> Result<TopicLog> {
        let mut log = TopicLog::default();
        let path = self.log_path(topic);
        if !path.exists() {
            return Ok(log);
        }

        let content = fs::read_to_string(&path).await?;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let message: InMemoryMessage = serde_json::from_str(line).map_err(|e| {
                ConduitError::Delivery(format!(
                    "Corrupt broker log {} at line {}: {e}",
                    path.display(),
                    line_no + 1
                ))
            })?;
            log.messages.push(message);
        }

        let prefix = format!("{topic}@");
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(consumer) = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".offset"))
            else {
                continue;
            };
            let text = fs::read_to_string(entry.path()).await?;
            let offset = text.trim().parse::<u64>().map_err(|e| {
                ConduitError::Delivery(format!("Corrupt cursor file {file_name}: {e}"))
            })?;
            log.cursors.insert(consumer.to_string(), offset);
        }

        tracing::debug!(
            topic = %topic,
            messages = log.messages.len(),
            consumers = log.cursors.len(),
            "Loaded broker topic"
        );
        Ok(log)
    }

    async fn write_cursor(&self, topic: &str, consumer: &str, offset: u64) -> Result<()> {
        let path = self.offset_path(topic, consumer);
        let tmp = path.with_extension("offset.tmp");
        fs::write(&tmp, offset.to_string()).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Broker directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// Mutable view of a topic, loaded from disk on first use
macro_rules! with_topic {
    ($self:ident, $topics:ident, $topic:expr) => {{
        if !$topics.contains_key($topic) {
            let loaded = $self.load_topic($topic).await?;
            $topics.insert($topic.to_string(), loaded);
        }
        $topics
            .get_mut($topic)
            .ok_or_else(|| ConduitError::Delivery(format!("Topic '{}' not loaded", $topic)))?
    }};
}

#[async_trait]
impl Broker for FileBroker {
    fn address(&self) -> &str {
        &self.address
    }

    async fn publish(&self, topic: &str, message: &InMemoryMessage) -> Result<u64> {
        validate_topic(topic)?;
        let mut topics = self.topics.lock().await;
        let log = with_topic!(self, topics, topic);

        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(topic))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        log.messages.push(message.clone());
        Ok(log.end() - 1)
    }

    async fn poll(&self, topic: &str, consumer: &str, max: usize) -> Result<Vec<BrokerRecord>> {
        validate_topic(topic)?;
        let mut topics = self.topics.lock().await;
        let log = with_topic!(self, topics, topic);
        Ok(log.read(consumer, max))
    }

    async fn commit(&self, topic: &str, consumer: &str, next_offset: u64) -> Result<()> {
        validate_topic(topic)?;
        validate_topic(consumer)?;
        let mut topics = self.topics.lock().await;
        let log = with_topic!(self, topics, topic);
        let next_offset = next_offset.min(log.end());
        self.write_cursor(topic, consumer, next_offset).await?;
        log.cursors.insert(consumer.to_string(), next_offset);
        Ok(())
    }

    async fn pending(&self, topic: &str, consumer: &str) -> Result<u64> {
        validate_topic(topic)?;
        let mut topics = self.topics.lock().await;
        let log = with_topic!(self, topics, topic);
        Ok(log.pending(consumer))
    }

    async fn skip_to_end(&self, topic: &str, consumer: &str) -> Result<u64> {
        validate_topic(topic)?;
        validate_topic(consumer)?;
        let mut topics = self.topics.lock().await;
        let log = with_topic!(self, topics, topic);
        let skipped = log.pending(consumer);
        let end = log.end();
        self.write_cursor(topic, consumer, end).await?;
        log.cursors.insert(consumer.to_string(), end);
        Ok(skipped)
    }
}
