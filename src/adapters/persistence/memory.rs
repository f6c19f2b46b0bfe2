//! In-memory persistence
//!
//! One mutex guards all state, which gives every counter mutation the same
//! atomicity the row locks give [`PostgresStore`](super::PostgresStore).

use super::traits::{AuditStore, BucketStore, SinkStore};
use crate::domain::{
    BucketCounter, BucketEntry, ConduitError, DestinationId, EntryMode, Qualifier, Result,
    SinkId, SinkRecord, TransferStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Audit copy kept by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct AuditCopy {
    pub sink_id: SinkId,
    pub destination_id: DestinationId,
    pub record: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    next_sink: i64,
    sinks: BTreeMap<SinkId, SinkRecord>,
    counters: HashMap<Qualifier, BucketCounter>,
    buckets: HashMap<(Qualifier, u32), Vec<BucketEntry>>,
    audit: Vec<AuditCopy>,
}

/// Store implementing every persistence trait in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Audit copies stored so far
    pub fn audit_copies(&self) -> Vec<AuditCopy> {
        self.state().audit.clone()
    }

    /// Counter snapshot without creating it
    pub fn counter(&self, qualifier: &Qualifier) -> Option<BucketCounter> {
        self.state().counters.get(qualifier).cloned()
    }

    /// Number of entries currently in a bucket
    pub fn bucket_len(&self, qualifier: &Qualifier, bucket: u32) -> usize {
        self.state()
            .buckets
            .get(&(qualifier.clone(), bucket))
            .map_or(0, Vec::len)
    }
}

fn missing_counter(qualifier: &Qualifier) -> ConduitError {
    ConduitError::Bucket(format!("No bucket counter for qualifier '{qualifier}'"))
}

#[async_trait]
impl SinkStore for MemoryStore {
    async fn get_data_sink(&self, id: SinkId) -> Result<Option<SinkRecord>> {
        Ok(self.state().sinks.get(&id).cloned())
    }

    async fn new_sink_key(&self) -> Result<SinkId> {
        let mut state = self.state();
        state.next_sink += 1;
        Ok(SinkId::new(state.next_sink))
    }

    async fn store_new_sink(&self, sink: &SinkRecord) -> Result<()> {
        self.state().sinks.insert(sink.id, sink.clone());
        Ok(())
    }

    async fn find_by_name(
        &self,
        destination: &DestinationId,
        name: &str,
    ) -> Result<Option<SinkRecord>> {
        Ok(self
            .state()
            .sinks
            .values()
            .find(|s| &s.destination_id == destination && s.destination_name == name)
            .cloned())
    }

    async fn update_transfer_status(&self, id: SinkId, status: TransferStatus) -> Result<()> {
        let mut state = self.state();
        let sink = state
            .sinks
            .get_mut(&id)
            .ok_or_else(|| ConduitError::Persistence(format!("Sink {id} not found")))?;
        sink.transfer_status = status;
        Ok(())
    }

    async fn list_sinks(&self, limit: usize) -> Result<Vec<SinkRecord>> {
        Ok(self
            .state()
            .sinks
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn load_counter(
        &self,
        qualifier: &Qualifier,
        max_buckets: u32,
    ) -> Result<BucketCounter> {
        let mut state = self.state();
        Ok(state
            .counters
            .entry(qualifier.clone())
            .or_insert_with(|| BucketCounter::new(qualifier.clone(), max_buckets))
            .clone())
    }

    async fn get_refs(&self, qualifier: &Qualifier, bucket: u32) -> Result<Vec<String>> {
        Ok(self
            .state()
            .buckets
            .get(&(qualifier.clone(), bucket))
            .map(|entries| entries.iter().map(|e| e.record_ref.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_entries(
        &self,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
    ) -> Result<Vec<BucketEntry>> {
        let state = self.state();
        let Some(entries) = state.buckets.get(&(qualifier.clone(), bucket)) else {
            return Ok(Vec::new());
        };
        Ok(refs
            .iter()
            .filter_map(|r| entries.iter().find(|e| &e.record_ref == r).cloned())
            .collect())
    }

    async fn get_modes(
        &self,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
    ) -> Result<HashMap<String, EntryMode>> {
        let state = self.state();
        let Some(entries) = state.buckets.get(&(qualifier.clone(), bucket)) else {
            return Ok(HashMap::new());
        };
        Ok(entries
            .iter()
            .filter(|e| refs.contains(&e.record_ref))
            .map(|e| (e.record_ref.clone(), e.mode))
            .collect())
    }

    async fn delete_bucket_contents(&self, qualifier: &Qualifier, bucket: u32) -> Result<u64> {
        Ok(self
            .state()
            .buckets
            .remove(&(qualifier.clone(), bucket))
            .map_or(0, |entries| entries.len() as u64))
    }

    async fn switch_bucket(&self, qualifier: &Qualifier, new_bucket: u32) -> Result<BucketCounter> {
        let mut state = self.state();
        let counter = state
            .counters
            .get_mut(qualifier)
            .ok_or_else(|| missing_counter(qualifier))?;
        if let Some(pending) = counter.in_progress {
            return Err(ConduitError::Bucket(format!(
                "Qualifier '{qualifier}' still has bucket {pending} in progress"
            )));
        }
        let before = counter.clone();
        counter.in_progress = Some(counter.current);
        counter.current = new_bucket;
        Ok(before)
    }

    async fn mark_in_progress(&self, qualifier: &Qualifier, bucket: u32) -> Result<()> {
        let mut state = self.state();
        let counter = state
            .counters
            .get_mut(qualifier)
            .ok_or_else(|| missing_counter(qualifier))?;
        counter.in_progress = Some(bucket);
        Ok(())
    }

    async fn clear_in_progress(&self, qualifier: &Qualifier) -> Result<()> {
        let mut state = self.state();
        let counter = state
            .counters
            .get_mut(qualifier)
            .ok_or_else(|| missing_counter(qualifier))?;
        counter.in_progress = None;
        Ok(())
    }

    async fn append_entry(&self, qualifier: &Qualifier, entry: &BucketEntry) -> Result<u32> {
        let mut state = self.state();
        let current = state
            .counters
            .get(qualifier)
            .map(|c| c.current)
            .ok_or_else(|| missing_counter(qualifier))?;
        let entries = state.buckets.entry((qualifier.clone(), current)).or_default();
        entries.retain(|e| e.record_ref != entry.record_ref);
        entries.push(entry.clone());
        Ok(current)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn store_audit_copy(
        &self,
        sink_id: SinkId,
        destination: &DestinationId,
        record: &serde_json::Value,
    ) -> Result<()> {
        self.state().audit.push(AuditCopy {
            sink_id,
            destination_id: destination.clone(),
            record: record.clone(),
            stored_at: Utc::now(),
        });
        Ok(())
    }
}
