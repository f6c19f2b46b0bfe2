//! Persistence abstraction traits
//!
//! These traits are the only way the export and bucket pipelines touch
//! storage. [`MemoryStore`](super::MemoryStore) implements all three for
//! tests and single-process use; [`PostgresStore`](super::PostgresStore)
//! implements them over existing tables.

use crate::domain::{
    BucketCounter, BucketEntry, DestinationId, EntryMode, Qualifier, Result, SinkId, SinkRecord,
    TransferStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Export bookkeeping
#[async_trait]
pub trait SinkStore: Send + Sync {
    /// Loads a persisted sink record
    async fn get_data_sink(&self, id: SinkId) -> Result<Option<SinkRecord>>;

    /// Allocates a new, unique sink key
    ///
    /// Keys are never reused, even when the sink is never persisted.
    async fn new_sink_key(&self) -> Result<SinkId>;

    /// Persists a finalized sink record
    async fn store_new_sink(&self, sink: &SinkRecord) -> Result<()>;

    /// Finds a persisted sink by destination and expanded target name
    async fn find_by_name(&self, destination: &DestinationId, name: &str)
        -> Result<Option<SinkRecord>>;

    /// Updates the relay status of a persisted sink
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Persistence`](crate::domain::ConduitError::Persistence)
    /// when the sink does not exist.
    async fn update_transfer_status(&self, id: SinkId, status: TransferStatus) -> Result<()>;

    /// Most recent sinks first
    async fn list_sinks(&self, limit: usize) -> Result<Vec<SinkRecord>>;
}

/// Rotating bucket storage
///
/// Counter mutations must be atomic per qualifier.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Loads the counter, creating it with `max_buckets` if missing
    async fn load_counter(&self, qualifier: &Qualifier, max_buckets: u32)
        -> Result<BucketCounter>;

    /// Record references of a bucket, in insertion order
    async fn get_refs(&self, qualifier: &Qualifier, bucket: u32) -> Result<Vec<String>>;

    /// Entries for the given references, in the order of `refs`
    ///
    /// References that no longer exist are skipped.
    async fn get_entries(
        &self,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
    ) -> Result<Vec<BucketEntry>>;

    /// Entry modes for the given references
    async fn get_modes(
        &self,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
    ) -> Result<HashMap<String, EntryMode>>;

    /// Removes every entry of a bucket, returning how many were removed
    async fn delete_bucket_contents(&self, qualifier: &Qualifier, bucket: u32) -> Result<u64>;

    /// Atomically sets `current := new_bucket` and marks the old bucket in progress
    ///
    /// Returns the counter as it was before the switch.
    async fn switch_bucket(&self, qualifier: &Qualifier, new_bucket: u32) -> Result<BucketCounter>;

    /// Marks `bucket` in progress without rotating
    async fn mark_in_progress(&self, qualifier: &Qualifier, bucket: u32) -> Result<()>;

    /// Clears the in-progress marker
    async fn clear_in_progress(&self, qualifier: &Qualifier) -> Result<()>;

    /// Appends an entry to the current bucket, returning the bucket number
    ///
    /// An entry with the same `record_ref` in that bucket is replaced and
    /// moves to the end of the insertion order.
    async fn append_entry(&self, qualifier: &Qualifier, entry: &BucketEntry) -> Result<u32>;
}

/// Audit trail of exported records
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn store_audit_copy(
        &self,
        sink_id: SinkId,
        destination: &DestinationId,
        record: &serde_json::Value,
    ) -> Result<()>;
}
