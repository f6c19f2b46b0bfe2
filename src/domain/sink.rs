//! Sink records
//!
//! A sink is the persisted metadata of one export: where the data went, how
//! many records were read and written, and whether the downstream relay has
//! picked it up yet.

use super::ids::{DestinationId, SinkId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transfer status of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Not finalized yet
    #[default]
    Undefined,
    /// Export finished, waiting for a relay follow-up
    ReadyToExport,
    /// Export (and relay, if any) succeeded
    ResponseOk,
    /// Export or relay failed
    ResponseError,
}

impl TransferStatus {
    /// Stable string used by persistence backends
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Undefined => "undefined",
            TransferStatus::ReadyToExport => "ready_to_export",
            TransferStatus::ResponseOk => "response_ok",
            TransferStatus::ResponseError => "response_error",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undefined" => Ok(TransferStatus::Undefined),
            "ready_to_export" => Ok(TransferStatus::ReadyToExport),
            "response_ok" => Ok(TransferStatus::ResponseOk),
            "response_error" => Ok(TransferStatus::ResponseError),
            other => Err(format!("Unknown transfer status '{other}'")),
        }
    }
}

/// Metadata of one completed or in-progress export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    /// Sink key allocated at open time
    pub id: SinkId,

    /// Destination the export was written to
    pub destination_id: DestinationId,

    /// Expanded target name (file name, topic, ...)
    pub destination_name: String,

    /// Relay/transfer status
    pub transfer_status: TransferStatus,

    /// Records handed to the session
    pub source_count: u64,

    /// Records produced by the transformer and written
    pub mapped_count: u64,

    /// Wall-clock time between open and close
    pub processing_time_ms: u64,

    /// Bytes written, when size recording is enabled
    pub size_bytes: Option<u64>,

    /// Number of output parts written
    pub file_count: u32,

    /// When the session was opened
    pub created_at: DateTime<Utc>,

    /// When the session was closed
    pub completed_at: Option<DateTime<Utc>>,
}

impl SinkRecord {
    /// Allocates a new, not yet finalized sink record
    pub fn new(
        id: SinkId,
        destination_id: DestinationId,
        destination_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            destination_id,
            destination_name: destination_name.into(),
            transfer_status: TransferStatus::Undefined,
            source_count: 0,
            mapped_count: 0,
            processing_time_ms: 0,
            size_bytes: None,
            file_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the record has been finalized by a close
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }
}
