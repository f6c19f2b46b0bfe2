//! Rotating bucket export
//!
//! Entries for a qualifier accumulate in the current bucket of a ring of
//! `max_buckets`. An export rotates the ring and writes the vacated bucket
//! through a fresh [`ExportSession`]. The store's in-progress marker is set
//! together with the rotation and cleared only after a successful export, so
//! a crash in between makes the next run export the same bucket again in
//! full.

use super::fence::WriteFence;
use crate::adapters::persistence::{BucketStore, Stores};
use crate::config::{BucketConfig, BucketQualifierConfig, ConduitConfig};
use crate::core::export::{chunked, ExportContext, ExportParams, ExportSession};
use crate::domain::{
    BucketEntry, ConduitError, EntryMode, ExportResponse, Qualifier, Result, SinkId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Field added to each exported record when `include_entry_mode` is set
pub const ENTRY_MODE_FIELD: &str = "_mode";

/// One bucket export request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketExportRequest {
    pub qualifier: Qualifier,

    /// Export exactly this bucket, skipping rotation and deletion
    pub bucket: Option<u32>,

    /// Format requested by the caller, negotiated against the destination
    pub format: Option<String>,
}

impl BucketExportRequest {
    pub fn new(qualifier: Qualifier) -> Self {
        Self {
            qualifier,
            bucket: None,
            format: None,
        }
    }

    pub fn with_bucket(mut self, bucket: u32) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Per-qualifier serialization state
#[derive(Debug, Default)]
struct QualifierSlot {
    export: tokio::sync::Mutex<()>,
    fence: WriteFence,
    counter_ready: AtomicBool,
}

pub struct BucketExportCoordinator {
    store: Arc<dyn BucketStore>,
    exports: Arc<ExportContext>,
    qualifiers: HashMap<Qualifier, BucketQualifierConfig>,
    grace_period: Duration,
    slots: Mutex<HashMap<Qualifier, Arc<QualifierSlot>>>,
}

impl BucketExportCoordinator {
    pub fn new(
        store: Arc<dyn BucketStore>,
        exports: Arc<ExportContext>,
        config: &BucketConfig,
    ) -> Self {
        Self {
            store,
            exports,
            qualifiers: config
                .qualifiers
                .iter()
                .map(|q| (q.qualifier.clone(), q.clone()))
                .collect(),
            grace_period: config.grace_period(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ConduitConfig, stores: &Stores, exports: Arc<ExportContext>) -> Self {
        Self::new(stores.buckets.clone(), exports, &config.bucket)
    }

    fn qualifier_config(&self, qualifier: &Qualifier) -> Result<&BucketQualifierConfig> {
        self.qualifiers.get(qualifier).ok_or_else(|| {
            ConduitError::Configuration(format!("Unknown bucket qualifier '{qualifier}'"))
        })
    }

    fn slot(&self, qualifier: &Qualifier) -> Arc<QualifierSlot> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(qualifier.clone())
            .or_default()
            .clone()
    }

    /// Adds an entry to the current bucket of `qualifier`
    ///
    /// Returns the bucket the entry landed in.
    pub async fn add_entry(&self, qualifier: &Qualifier, entry: &BucketEntry) -> Result<u32> {
        let config = self.qualifier_config(qualifier)?;
        let slot = self.slot(qualifier);
        let _writer = slot.fence.enter().await;

        if !slot.counter_ready.load(Ordering::SeqCst) {
            self.store.load_counter(qualifier, config.max_buckets).await?;
            slot.counter_ready.store(true, Ordering::SeqCst);
        }
        self.store.append_entry(qualifier, entry).await
    }

    /// Runs one export for a qualifier
    ///
    /// Never fails: errors come back as a non-OK [`ExportResponse`] and leave
    /// any in-progress marker in place for the next run.
    pub async fn export_bucket(&self, request: BucketExportRequest) -> ExportResponse {
        let started = Instant::now();
        match self.run(&request).await {
            Ok(response) => {
                info!(
                    qualifier = %request.qualifier,
                    code = %response.code,
                    records = response.records_exported,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Bucket export finished"
                );
                response
            }
            Err(e) => {
                error!(qualifier = %request.qualifier, error = %e, "Bucket export failed");
                ExportResponse::from(e)
            }
        }
    }

    async fn run(&self, request: &BucketExportRequest) -> Result<ExportResponse> {
        let config = self.qualifier_config(&request.qualifier)?;
        let qualifier = &config.qualifier;
        let slot = self.slot(qualifier);
        let _exclusive = slot.export.lock().await;

        if let Some(bucket) = request.bucket {
            if bucket >= config.max_buckets {
                return Err(ConduitError::Bucket(format!(
                    "Bucket {bucket} is out of range for '{qualifier}' (max {})",
                    config.max_buckets
                )));
            }
            info!(qualifier = %qualifier, bucket, "Exporting requested bucket");
            return self.export_contents(config, bucket, request).await;
        }

        let counter = self.store.load_counter(qualifier, config.max_buckets).await?;
        slot.counter_ready.store(true, Ordering::SeqCst);

        if let Some(bucket) = counter.in_progress {
            warn!(
                qualifier = %qualifier,
                bucket,
                "Previous export did not complete, exporting the bucket again"
            );
            let response = self.export_contents(config, bucket, request).await?;
            self.store.clear_in_progress(qualifier).await?;
            return Ok(response);
        }

        let bucket = if config.switch_bucket {
            let next = counter.next_bucket();
            if config.delete_before_switch {
                let deleted = self.store.delete_bucket_contents(qualifier, next).await?;
                if deleted > 0 {
                    warn!(qualifier = %qualifier, bucket = next, deleted, "Deleted stale bucket contents");
                }
            }
            let previous = self.store.switch_bucket(qualifier, next).await?;
            info!(
                qualifier = %qualifier,
                from = previous.current,
                to = next,
                "Switched current bucket"
            );

            slot.fence.wait_for_writers().await;
            if !self.grace_period.is_zero() {
                tokio::time::sleep(self.grace_period).await;
            }
            previous.current
        } else {
            self.store.mark_in_progress(qualifier, counter.current).await?;
            counter.current
        };

        let response = self.export_contents(config, bucket, request).await?;
        self.store.clear_in_progress(qualifier).await?;
        Ok(response)
    }

    /// Exports every entry of one bucket through a new session
    async fn export_contents(
        &self,
        config: &BucketQualifierConfig,
        bucket: u32,
        request: &BucketExportRequest,
    ) -> Result<ExportResponse> {
        let qualifier = &config.qualifier;
        let refs = self.store.get_refs(qualifier, bucket).await?;
        if refs.is_empty() {
            info!(qualifier = %qualifier, bucket, "Bucket is empty");
            return Ok(ExportResponse::no_data(format!(
                "Bucket {bucket} of '{qualifier}' is empty"
            )));
        }

        let mut params = ExportParams::new(config.destination.clone());
        params.format = request.format.clone();
        let include_mode = self.exports.destination(&config.destination)?.include_entry_mode;

        let mut session = ExportSession::new(self.exports.clone());
        let sink_id = session.open(params).await?;

        // the session is closed even when streaming fails, so its sink record
        // is still written
        let streamed = self
            .stream_chunks(&mut session, sink_id, qualifier, bucket, &refs, include_mode)
            .await;
        let closed = session.close().await;
        streamed?;

        let records = closed?.map_or(0, |sink| sink.mapped_count);
        Ok(ExportResponse::ok(sink_id, records))
    }

    async fn stream_chunks(
        &self,
        session: &mut ExportSession,
        sink_id: SinkId,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
        include_mode: bool,
    ) -> Result<()> {
        let chunk_size = session.chunk_size()?;
        for (index, chunk) in chunked(refs, chunk_size).enumerate() {
            let entries = self.store.get_entries(qualifier, bucket, chunk).await?;
            let modes = if include_mode {
                self.store.get_modes(qualifier, bucket, chunk).await?
            } else {
                HashMap::new()
            };
            debug!(
                sink_id = %sink_id,
                chunk = index,
                entries = entries.len(),
                "Exporting bucket chunk"
            );

            for entry in entries {
                let mode = modes.get(&entry.record_ref).copied().unwrap_or(entry.mode);
                let payload = if include_mode {
                    with_mode(entry.payload, mode)
                } else {
                    entry.payload
                };
                session
                    .store(
                        Some(&entry.record_ref),
                        &entry.partition_key,
                        &entry.record_key,
                        payload,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BucketExportCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketExportCoordinator")
            .field("qualifiers", &self.qualifiers.keys().collect::<Vec<_>>())
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

/// Adds the entry mode to object payloads; other payloads are wrapped
fn with_mode(payload: Value, mode: EntryMode) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert(ENTRY_MODE_FIELD.to_string(), Value::from(mode.as_str()));
            Value::Object(map)
        }
        other => serde_json::json!({ "value": other, ENTRY_MODE_FIELD: mode.as_str() }),
    }
}
