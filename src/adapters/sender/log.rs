//! Sender that only logs

use super::{elapsed_ms, Sender};
use crate::config::{AsyncChannel, QueueSettings};
use crate::domain::{DeliveryOutcome, DeliveryReport, InMemoryMessage, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Accepts every message and writes it to the log
///
/// Useful for dry runs and for wiring up a channel before its receiver exists.
#[derive(Debug, Default)]
pub struct LogSender {
    queue: Option<String>,
    sent: u64,
}

impl LogSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[async_trait]
impl Sender for LogSender {
    async fn init(&mut self, settings: &QueueSettings) -> Result<()> {
        self.queue = Some(settings.id.to_string());
        Ok(())
    }

    async fn send(
        &mut self,
        channel: &AsyncChannel,
        _timeout: Duration,
        message: &InMemoryMessage,
        started_at: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        tracing::info!(
            queue = self.queue.as_deref().unwrap_or_default(),
            channel = %channel.id,
            message_id = %message.id,
            partition_key = %message.partition_key,
            record_key = %message.record_key,
            bytes = message.payload.len(),
            "Delivered message to log"
        );
        self.sent += 1;

        Ok(DeliveryReport {
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            object_ref: message.object_ref.clone(),
            outcome: DeliveryOutcome::Delivered,
            status_code: None,
            detail: None,
            started_at,
            duration_ms: elapsed_ms(started_at),
        })
    }

    async fn close(&mut self) -> Result<()> {
        tracing::debug!(sent = self.sent, "Log sender closed");
        Ok(())
    }
}
