//! Delivery report listeners

use crate::adapters::persistence::SinkStore;
use crate::domain::{DeliveryOutcome, DeliveryReport, SinkId, TransferStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives the report of every delivery attempt that reached the receiver
#[async_trait]
pub trait DeliveryListener: Send + Sync {
    async fn on_report(&self, report: &DeliveryReport);
}

/// Logs every report
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

#[async_trait]
impl DeliveryListener for LoggingListener {
    async fn on_report(&self, report: &DeliveryReport) {
        match report.outcome {
            DeliveryOutcome::Delivered => tracing::debug!(
                message_id = %report.message_id,
                channel = %report.channel_id,
                status = ?report.status_code,
                duration_ms = report.duration_ms,
                "Message delivered"
            ),
            DeliveryOutcome::Retry => tracing::info!(
                message_id = %report.message_id,
                channel = %report.channel_id,
                status = ?report.status_code,
                "Receiver asked for a retry"
            ),
            DeliveryOutcome::Rejected => tracing::warn!(
                message_id = %report.message_id,
                channel = %report.channel_id,
                status = ?report.status_code,
                detail = report.detail.as_deref().unwrap_or_default(),
                "Message rejected by receiver"
            ),
        }
    }
}

/// Records final outcomes of sink follow-ups on the sink record
///
/// Follow-ups carry `sink:<id>` as object reference; other messages are
/// ignored.
pub struct SinkStatusListener {
    sinks: Arc<dyn SinkStore>,
}

impl SinkStatusListener {
    pub fn new(sinks: Arc<dyn SinkStore>) -> Self {
        Self { sinks }
    }
}

/// Sink key from a follow-up object reference
pub(crate) fn sink_ref(object_ref: Option<&str>) -> Option<SinkId> {
    object_ref?.strip_prefix("sink:")?.parse().ok()
}

#[async_trait]
impl DeliveryListener for SinkStatusListener {
    async fn on_report(&self, report: &DeliveryReport) {
        let Some(sink_id) = sink_ref(report.object_ref.as_deref()) else {
            return;
        };
        let status = match report.outcome {
            DeliveryOutcome::Delivered => TransferStatus::ResponseOk,
            DeliveryOutcome::Rejected => TransferStatus::ResponseError,
            DeliveryOutcome::Retry => return,
        };
        if let Err(e) = self.sinks.update_transfer_status(sink_id, status).await {
            tracing::error!(sink_id = %sink_id, error = %e, "Failed to record transfer status");
        }
    }
}

/// Forwards each report to every listener in order
#[derive(Default)]
pub struct ListenerChain {
    listeners: Vec<Arc<dyn DeliveryListener>>,
}

impl ListenerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn DeliveryListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

#[async_trait]
impl DeliveryListener for ListenerChain {
    async fn on_report(&self, report: &DeliveryReport) {
        for listener in &self.listeners {
            listener.on_report(report).await;
        }
    }
}
