//! Delivery envelopes
//!
//! [`InMemoryMessage`] is the unit written to the broker by `send_async` and
//! handed to a [`Sender`](crate::adapters::sender::Sender) by the queue worker.

use super::ids::ChannelId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Envelope carried through a delivery queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryMessage {
    /// Deterministic content hash, used as idempotency key downstream
    pub id: String,

    /// Tenant the message belongs to
    pub tenant_id: String,

    /// Channel the message was sent on
    pub channel_id: ChannelId,

    /// Reference to the business object, if any
    pub object_ref: Option<String>,

    /// Ordering key inside the broker
    pub partition_key: String,

    /// Record key within the partition
    pub record_key: String,

    /// Serialized payload
    pub payload: String,

    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl InMemoryMessage {
    /// Builds a message and derives its id from the content
    pub fn new(
        tenant_id: impl Into<String>,
        channel_id: ChannelId,
        object_ref: Option<String>,
        partition_key: impl Into<String>,
        record_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let partition_key = partition_key.into();
        let record_key = record_key.into();
        let payload = payload.into();
        let id = message_id(
            &channel_id,
            object_ref.as_deref(),
            &record_key,
            &payload,
        );

        Self {
            id,
            tenant_id: tenant_id.into(),
            channel_id,
            object_ref,
            partition_key,
            record_key,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// SHA-256 over the identifying fields, hex encoded
///
/// Fields are separated by a NUL byte so that ("ab", "c") and ("a", "bc")
/// hash differently.
fn message_id(
    channel_id: &ChannelId,
    object_ref: Option<&str>,
    record_key: &str,
    payload: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(channel_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(object_ref.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(record_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of handing one message to a sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Accepted by the receiver
    Delivered,
    /// Transient failure, the same message is tried again after backoff
    Retry,
    /// Permanent rejection, the message is skipped
    Rejected,
}

impl DeliveryOutcome {
    /// Whether the worker may advance past the message
    pub fn is_final(&self) -> bool {
        !matches!(self, DeliveryOutcome::Retry)
    }
}

/// What a sender reports back for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Message id
    pub message_id: String,

    /// Channel the message was sent on
    pub channel_id: ChannelId,

    /// Business object reference carried by the message
    pub object_ref: Option<String>,

    /// Outcome of the send
    pub outcome: DeliveryOutcome,

    /// Remote status code, when the transport has one
    pub status_code: Option<u16>,

    /// Free-form detail (response body excerpt, error text)
    pub detail: Option<String>,

    /// When the send started
    pub started_at: DateTime<Utc>,

    /// Send duration in milliseconds
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelId {
        ChannelId::new("orders").unwrap()
    }

    #[test]
    fn test_message_id_is_deterministic() {
        let a = InMemoryMessage::new("t1", channel(), Some("obj-1".into()), "p", "k", "{}");
        let b = InMemoryMessage::new("t2", channel(), Some("obj-1".into()), "other", "k", "{}");
        // tenant and partition do not take part in the id
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn test_message_id_changes_with_payload() {
        let a = InMemoryMessage::new("t", channel(), None, "p", "k", "{\"a\":1}");
        let b = InMemoryMessage::new("t", channel(), None, "p", "k", "{\"a\":2}");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_message_id_field_boundaries() {
        let a = InMemoryMessage::new("t", channel(), None, "p", "ab", "c");
        let b = InMemoryMessage::new("t", channel(), None, "p", "a", "bc");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_outcome_finality() {
        assert!(DeliveryOutcome::Delivered.is_final());
        assert!(DeliveryOutcome::Rejected.is_final());
        assert!(!DeliveryOutcome::Retry.is_final());
    }
}
