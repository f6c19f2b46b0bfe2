//! Process-local broker

use super::{validate_topic, Broker, BrokerRecord};
use crate::domain::{InMemoryMessage, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub(crate) struct TopicLog {
    pub(crate) messages: Vec<InMemoryMessage>,
    pub(crate) cursors: HashMap<String, u64>,
}

impl TopicLog {
    pub(crate) fn cursor(&self, consumer: &str) -> u64 {
        self.cursors.get(consumer).copied().unwrap_or(0)
    }

    pub(crate) fn read(&self, consumer: &str, max: usize) -> Vec<BrokerRecord> {
        let start = self.cursor(consumer) as usize;
        self.messages
            .iter()
            .enumerate()
            .skip(start)
            .take(max)
            .map(|(offset, message)| BrokerRecord {
                offset: offset as u64,
                message: message.clone(),
            })
            .collect()
    }

    pub(crate) fn end(&self) -> u64 {
        self.messages.len() as u64
    }

    pub(crate) fn pending(&self, consumer: &str) -> u64 {
        self.end().saturating_sub(self.cursor(consumer))
    }
}

/// Broker keeping every topic in memory
#[derive(Debug)]
pub struct MemoryBroker {
    address: String,
    topics: Mutex<HashMap<String, TopicLog>>,
}

impl MemoryBroker {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn address(&self) -> &str {
        &self.address
    }

    async fn publish(&self, topic: &str, message: &InMemoryMessage) -> Result<u64> {
        validate_topic(topic)?;
        let mut topics = self.topics();
        let log = topics.entry(topic.to_string()).or_default();
        log.messages.push(message.clone());
        Ok(log.end() - 1)
    }

    async fn poll(&self, topic: &str, consumer: &str, max: usize) -> Result<Vec<BrokerRecord>> {
        Ok(self
            .topics()
            .get(topic)
            .map(|log| log.read(consumer, max))
            .unwrap_or_default())
    }

    async fn commit(&self, topic: &str, consumer: &str, next_offset: u64) -> Result<()> {
        let mut topics = self.topics();
        let log = topics.entry(topic.to_string()).or_default();
        let next_offset = next_offset.min(log.end());
        log.cursors.insert(consumer.to_string(), next_offset);
        Ok(())
    }

    async fn pending(&self, topic: &str, consumer: &str) -> Result<u64> {
        Ok(self
            .topics()
            .get(topic)
            .map(|log| log.pending(consumer))
            .unwrap_or(0))
    }

    async fn skip_to_end(&self, topic: &str, consumer: &str) -> Result<u64> {
        let mut topics = self.topics();
        let log = topics.entry(topic.to_string()).or_default();
        let skipped = log.pending(consumer);
        let end = log.end();
        log.cursors.insert(consumer.to_string(), end);
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelId;

    fn message(key: &str, payload: &str) -> InMemoryMessage {
        InMemoryMessage::new(
            "t",
            ChannelId::new("c").unwrap(),
            None,
            "p",
            key,
            payload,
        )
    }

    #[tokio::test]
    async fn test_publish_poll_commit() {
        let broker = MemoryBroker::new("memory://test");
        for i in 0..5 {
            let offset = broker
                .publish("orders", &message(&i.to_string(), "{}"))
                .await
                .unwrap();
            assert_eq!(offset, i);
        }

        let batch = broker.poll("orders", "q1", 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].offset, 0);
        assert_eq!(batch[2].message.record_key, "2");

        broker.commit("orders", "q1", 3).await.unwrap();
        assert_eq!(broker.pending("orders", "q1").await.unwrap(), 2);

        // cursors are per consumer
        assert_eq!(broker.pending("orders", "q2").await.unwrap(), 5);

        let batch = broker.poll("orders", "q1", 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 3);
    }

    #[tokio::test]
    async fn test_skip_to_end() {
        let broker = MemoryBroker::new("memory://test");
        broker.publish("orders", &message("a", "1")).await.unwrap();
        broker.publish("orders", &message("b", "2")).await.unwrap();

        assert_eq!(broker.skip_to_end("orders", "q").await.unwrap(), 2);
        assert_eq!(broker.pending("orders", "q").await.unwrap(), 0);
        assert!(broker.poll("orders", "q", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_topic_is_empty() {
        let broker = MemoryBroker::new("memory://test");
        assert!(broker.poll("nothing", "q", 10).await.unwrap().is_empty());
        assert_eq!(broker.pending("nothing", "q").await.unwrap(), 0);
    }
}
