//! HTTP webhook sender

use super::{elapsed_ms, Sender};
use crate::config::{AsyncChannel, QueueSettings, SecretString};
use crate::domain::{ConduitError, DeliveryReport, InMemoryMessage, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder};
use secrecy::ExposeSecret;
use std::time::Duration;

/// Longest response body excerpt kept in a report
const DETAIL_LIMIT: usize = 512;

/// POSTs each message payload as JSON to the queue endpoint
///
/// Every request carries `X-Conduit-Message-Id`, `X-Conduit-Tenant` and
/// `X-Conduit-Channel`. When the channel names an idempotency header, the
/// message id is sent in it as well.
#[derive(Debug, Default)]
pub struct HttpSender {
    client: Option<Client>,
    endpoint: String,
    bearer_token: Option<SecretString>,
}

impl HttpSender {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn init(&mut self, settings: &QueueSettings) -> Result<()> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                ConduitError::Configuration(format!(
                    "queue '{}': the http sender needs an endpoint",
                    settings.id
                ))
            })?;

        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConduitError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        self.client = Some(client);
        self.endpoint = endpoint.to_string();
        self.bearer_token = settings.bearer_token.clone();
        tracing::debug!(queue = %settings.id, endpoint = %self.endpoint, "HTTP sender ready");
        Ok(())
    }

    async fn send(
        &mut self,
        channel: &AsyncChannel,
        timeout: Duration,
        message: &InMemoryMessage,
        started_at: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ConduitError::Delivery("HTTP sender used before init".to_string()))?;

        let mut request = client
            .post(&self.endpoint)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Conduit-Message-Id", &message.id)
            .header("X-Conduit-Tenant", &message.tenant_id)
            .header("X-Conduit-Channel", message.channel_id.as_str())
            .body(message.payload.clone());

        if let Some(header) = &channel.idempotency_header {
            request = request.header(header.as_str(), &message.id);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret().as_ref());
        }

        let response = request.send().await.map_err(|e| {
            ConduitError::Delivery(format!("POST {} failed: {e}", self.endpoint))
        })?;

        let status = response.status().as_u16();
        let outcome = self.outcome_for_status(status);
        let detail = if response.status().is_success() {
            None
        } else {
            let body = response.text().await.unwrap_or_default();
            Some(body.chars().take(DETAIL_LIMIT).collect())
        };

        Ok(DeliveryReport {
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            object_ref: message.object_ref.clone(),
            outcome,
            status_code: Some(status),
            detail,
            started_at,
            duration_ms: elapsed_ms(started_at),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{secret_string, DeliveryDefaults, QueueConfig};
    use crate::domain::{ChannelId, DeliveryOutcome, QueueId};

    fn settings(endpoint: Option<String>) -> QueueSettings {
        let mut queue = QueueConfig::new(QueueId::new("hooks").unwrap());
        queue.topic = Some("hooks".to_string());
        queue.broker_address = Some("memory://test".to_string());
        queue.endpoint = endpoint;
        queue.bearer_token = Some(secret_string("tok".to_string()));
        queue.resolve(&DeliveryDefaults::default()).unwrap()
    }

    fn channel() -> AsyncChannel {
        AsyncChannel {
            id: ChannelId::new("orders").unwrap(),
            active: true,
            queue: Some(QueueId::new("hooks").unwrap()),
            idempotency_header: Some("Idempotency-Key".to_string()),
        }
    }

    fn message() -> InMemoryMessage {
        InMemoryMessage::new(
            "tenant-a",
            ChannelId::new("orders").unwrap(),
            Some("sink:1".to_string()),
            "p",
            "k",
            "{\"a\":1}",
        )
    }

    #[tokio::test]
    async fn test_init_requires_endpoint() {
        let mut sender = HttpSender::new();
        let err = sender.init(&settings(None)).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_delivered_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let msg = message();
        let mock = server
            .mock("POST", "/hook")
            .match_header("idempotency-key", msg.id.as_str())
            .match_header("authorization", "Bearer tok")
            .match_header("x-conduit-tenant", "tenant-a")
            .match_body("{\"a\":1}")
            .with_status(202)
            .create_async()
            .await;

        let mut sender = HttpSender::new();
        sender
            .init(&settings(Some(format!("{}/hook", server.url()))))
            .await
            .unwrap();
        let report = sender
            .send(&channel(), Duration::from_secs(5), &msg, Utc::now())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert_eq!(report.status_code, Some(202));
        assert_eq!(report.object_ref.as_deref(), Some("sink:1"));
        assert!(report.detail.is_none());
    }

    #[tokio::test]
    async fn test_status_mapping_and_detail() {
        let mut server = mockito::Server::new_async().await;
        let _busy = server
            .mock("POST", "/busy")
            .with_status(503)
            .with_body("try later")
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/bad")
            .with_status(422)
            .with_body("invalid payload")
            .create_async()
            .await;

        let mut sender = HttpSender::new();
        sender
            .init(&settings(Some(format!("{}/busy", server.url()))))
            .await
            .unwrap();
        let report = sender
            .send(&channel(), Duration::from_secs(5), &message(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Retry);
        assert_eq!(report.detail.as_deref(), Some("try later"));

        let mut sender = HttpSender::new();
        sender
            .init(&settings(Some(format!("{}/bad", server.url()))))
            .await
            .unwrap();
        let report = sender
            .send(&channel(), Duration::from_secs(5), &message(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Rejected);
        assert_eq!(report.status_code, Some(422));
    }

    #[tokio::test]
    async fn test_unreachable_is_error() {
        let mut sender = HttpSender::new();
        // port 9 (discard) is closed on test hosts
        sender
            .init(&settings(Some("http://127.0.0.1:9/hook".to_string())))
            .await
            .unwrap();
        let err = sender
            .send(&channel(), Duration::from_millis(500), &message(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Delivery(_)));
    }
}
