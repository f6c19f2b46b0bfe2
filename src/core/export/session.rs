//! Export session state machine
//!
//! An [`ExportSession`] writes one export: it negotiates format, encoding and
//! field selection at [`open`](ExportSession::open), streams records through
//! the transformer and format generator in [`store`](ExportSession::store),
//! and finalizes and persists the [`SinkRecord`] in
//! [`close`](ExportSession::close).
//!
//! ```text
//!            open (lazy_open)         store / output_stream
//!  Closed ───────────────────► Lazy ─────────────────────────► Opened
//!    │                                                           ▲
//!    └───────────────────────── open ────────────────────────────┘
//!  close from Lazy or Opened returns to Closed
//! ```

use super::naming::PartNamer;
use super::params::ExportParams;
use crate::adapters::format::{
    Encoding, FormatGenerator, FormatRegistry, GeneratorContext, RecordRow,
};
use crate::adapters::output::{OutputRegistry, OutputResource};
use crate::adapters::persistence::{AuditStore, SinkStore, Stores};
use crate::config::{ConduitConfig, DestinationConfig, ExecutionPolicy};
use crate::core::delivery::DeliveryService;
use crate::core::transform::{
    FoldableParams, GridConfigSource, PreOutputTransformer, StaticGridSource, TransformStats,
    TransformerRegistry,
};
use crate::domain::{
    ConduitError, DestinationId, Result, SinkId, SinkRecord, TransferStatus,
};
use crate::{log_export_complete, log_export_start};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

/// Collaborators shared by every session
pub struct ExportContext {
    destinations: HashMap<DestinationId, DestinationConfig>,
    formats: FormatRegistry,
    outputs: OutputRegistry,
    transformers: TransformerRegistry,
    grid_source: Option<Arc<dyn GridConfigSource>>,
    sinks: Arc<dyn SinkStore>,
    audit: Option<Arc<dyn AuditStore>>,
    delivery: Option<Arc<DeliveryService>>,
}

impl ExportContext {
    /// Context with the built-in registries and no optional collaborators
    pub fn new(destinations: Vec<DestinationConfig>, sinks: Arc<dyn SinkStore>) -> Self {
        Self {
            destinations: destinations
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
            formats: FormatRegistry::with_defaults(),
            outputs: OutputRegistry::with_defaults(),
            transformers: TransformerRegistry::with_defaults(),
            grid_source: None,
            sinks,
            audit: None,
            delivery: None,
        }
    }

    /// Context for a loaded configuration
    ///
    /// Configured `[[grids]]` become the grid source.
    pub fn from_config(
        config: &ConduitConfig,
        stores: &Stores,
        delivery: Option<Arc<DeliveryService>>,
    ) -> Result<Self> {
        let mut ctx = Self::new(config.destinations.clone(), stores.sinks.clone())
            .with_audit(stores.audit.clone());
        let grids = StaticGridSource::from_config(&config.grids)?;
        if !grids.is_empty() {
            ctx = ctx.with_grid_source(Arc::new(grids));
        }
        ctx.delivery = delivery;
        Ok(ctx)
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_outputs(mut self, outputs: OutputRegistry) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_transformers(mut self, transformers: TransformerRegistry) -> Self {
        self.transformers = transformers;
        self
    }

    pub fn with_grid_source(mut self, source: Arc<dyn GridConfigSource>) -> Self {
        self.grid_source = Some(source);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_delivery(mut self, delivery: Arc<DeliveryService>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn destination(&self, id: &DestinationId) -> Result<&DestinationConfig> {
        self.destinations.get(id).ok_or_else(|| {
            ConduitError::Configuration(format!("Unknown destination '{id}'"))
        })
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    pub fn sinks(&self) -> &Arc<dyn SinkStore> {
        &self.sinks
    }
}

impl fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.destinations.keys().map(|d| d.as_str()).collect();
        ids.sort_unstable();
        f.debug_struct("ExportContext")
            .field("destinations", &ids)
            .field("formats", &self.formats.formats())
            .field("grid_source", &self.grid_source.is_some())
            .field("audit", &self.audit.is_some())
            .field("delivery", &self.delivery.is_some())
            .finish()
    }
}

/// Lifecycle state of an [`ExportSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    /// Opened, but output streams are deferred until first use
    Lazy,
    Opened,
}

/// Everything belonging to the export between open and close
struct ActiveExport {
    destination: DestinationConfig,
    format: String,
    generator_ctx: GeneratorContext,
    names: PartNamer,
    transformer: Box<dyn PreOutputTransformer>,
    generator: Option<Box<dyn FormatGenerator>>,
    output: Option<Box<dyn OutputResource>>,
    sink: SinkRecord,
    part: u32,
    records_in_part: u64,
    bytes_written: u64,
    size_known: bool,
    started: Instant,
}

/// A record on its way to the generator
struct Outgoing<'a> {
    record_ref: Option<&'a str>,
    partition_key: &'a str,
    record_key: &'a str,
    record: Value,
    /// Header and footer records are not audited, mirrored or counted
    synthetic: bool,
}

impl ActiveExport {
    async fn open_part(&mut self, ctx: &ExportContext) -> Result<()> {
        let part = self.part + 1;
        let name = self.names.part_name(part);

        let mut output = ctx.outputs.create(&self.destination.output)?;
        output.open(&self.destination, &name).await?;
        let mut generator = ctx.formats.create(&self.format)?;
        generator.open(&self.generator_ctx, output.as_mut()).await?;

        debug!(
            sink_id = %self.sink.id,
            part,
            target = %output.effective_name().unwrap_or_else(|| name.clone()),
            "Opened export part"
        );
        self.output = Some(output);
        self.generator = Some(generator);
        self.part = part;
        self.records_in_part = 0;
        self.sink.file_count += 1;
        Ok(())
    }

    async fn close_part(&mut self) -> Result<()> {
        let (Some(mut generator), Some(mut output)) = (self.generator.take(), self.output.take())
        else {
            return Ok(());
        };

        let generator_result = generator.close(output.as_mut()).await;
        // the output is closed even when the generator trailer failed
        let output_result = output.close().await;
        generator_result?;
        output_result?;

        match output.size() {
            Some(size) => self.bytes_written += size,
            None => self.size_known = false,
        }
        Ok(())
    }

    fn rollover_due(&self) -> bool {
        self.destination
            .max_records_per_file
            .is_some_and(|max| max > 0 && self.records_in_part >= max)
    }

    async fn emit(&mut self, ctx: &ExportContext, out: Outgoing<'_>) -> Result<()> {
        // header and footer records stay in the part they belong to
        if !out.synthetic && self.rollover_due() {
            self.close_part().await?;
            self.open_part(ctx).await?;
        }

        if !out.synthetic {
            if self.destination.audit {
                if let Some(audit) = &ctx.audit {
                    audit
                        .store_audit_copy(self.sink.id, &self.destination.id, &out.record)
                        .await?;
                }
            }
            self.mirror(ctx, &out).await;
        }

        let (Some(generator), Some(output)) = (self.generator.as_mut(), self.output.as_mut())
        else {
            return Err(ConduitError::Sequencing(
                "export part is not open".to_string(),
            ));
        };

        let row = RecordRow {
            source_seq: self.sink.source_count,
            mapped_seq: self.sink.mapped_count + 1,
            record_ref: out.record_ref,
            partition_key: out.partition_key,
            record_key: out.record_key,
            record: &out.record,
        };
        match generator.generate_data(output.as_mut(), row).await {
            Ok(()) => {
                if !out.synthetic {
                    self.sink.mapped_count += 1;
                    self.records_in_part += 1;
                }
                Ok(())
            }
            Err(e) if e.is_record_level() => {
                warn!(
                    sink_id = %self.sink.id,
                    record_key = %out.record_key,
                    error = %e,
                    "Skipping record that could not be serialized"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Mirrors a record into its relay channel; failures only warn
    async fn mirror(&self, ctx: &ExportContext, out: &Outgoing<'_>) {
        let (Some(channel), Some(delivery)) = (&self.destination.relay_channel, &ctx.delivery)
        else {
            return;
        };

        let payload = match serde_json::to_string(&out.record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(sink_id = %self.sink.id, error = %e, "Cannot serialize record for relay");
                return;
            }
        };
        let partition_key = format!("{}:{}", self.destination.id, out.partition_key);
        if let Err(e) = delivery
            .send_async(
                channel,
                payload,
                out.record_ref.map(str::to_string),
                &partition_key,
                out.record_key,
            )
            .await
        {
            warn!(
                sink_id = %self.sink.id,
                channel = %channel,
                error = %e,
                "Failed to mirror record into relay channel"
            );
        }
    }

    async fn emit_all(&mut self, ctx: &ExportContext, records: Vec<Value>) -> Result<()> {
        for record in records {
            self.emit(
                ctx,
                Outgoing {
                    record_ref: None,
                    partition_key: "",
                    record_key: "",
                    record,
                    synthetic: true,
                },
            )
            .await?;
        }
        Ok(())
    }

    fn stats(&self) -> TransformStats {
        TransformStats {
            source_count: self.sink.source_count,
            mapped_count: self.sink.mapped_count,
        }
    }

    /// Footer records, then the last part is closed
    async fn finish(&mut self, ctx: &ExportContext) -> Result<()> {
        match self.transformer.footer_data(self.stats()) {
            Ok(footer) => self.emit_all(ctx, footer).await?,
            Err(e) if e.is_record_level() => {
                warn!(sink_id = %self.sink.id, error = %e, "Skipping footer records");
            }
            Err(e) => return Err(e),
        }
        self.close_part().await
    }

    fn relay_policy(&self) -> ExecutionPolicy {
        self.destination
            .relay
            .as_ref()
            .map_or(ExecutionPolicy::None, |r| r.policy)
    }
}

/// One export, from open to close
///
/// Sessions are single-use per export but can be reopened after close.
pub struct ExportSession {
    ctx: Arc<ExportContext>,
    state: SessionState,
    active: Option<ActiveExport>,
}

impl ExportSession {
    pub fn new(ctx: Arc<ExportContext>) -> Self {
        Self {
            ctx,
            state: SessionState::Closed,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sink key of the current export
    pub fn sink_id(&self) -> Option<SinkId> {
        self.active.as_ref().map(|a| a.sink.id)
    }

    /// Opens an export and returns its sink key
    ///
    /// # Errors
    ///
    /// - [`ConduitError::Sequencing`] unless the session is closed
    /// - [`ConduitError::Configuration`] for an unknown destination, encoding,
    ///   format or transformer
    /// - [`ConduitError::FormatUnspecified`] / [`ConduitError::FormatMismatch`]
    ///   from format negotiation
    /// - [`ConduitError::DuplicateExport`] when duplicate checking is enabled
    ///   and the target name was already exported
    pub async fn open(&mut self, params: ExportParams) -> Result<SinkId> {
        if self.state != SessionState::Closed {
            return Err(ConduitError::Sequencing(format!(
                "open() requires a closed session, state is {:?}",
                self.state
            )));
        }

        let ctx = Arc::clone(&self.ctx);
        let destination = ctx.destination(&params.destination_id)?.clone();
        let format = negotiate_format(&params, &destination)?;
        let encoding = params
            .encoding
            .as_deref()
            .or(destination.encoding.as_deref())
            .map(str::parse::<Encoding>)
            .transpose()?
            .unwrap_or_default();
        let extension = ctx.formats.create(&format)?.extension();

        let sink_id = ctx.sinks.new_sink_key().await?;
        let names = PartNamer::new(
            &destination.name_pattern,
            &destination.id,
            sink_id,
            params.grid_id.as_deref(),
            Utc::now(),
            extension,
        );
        let name = names.part_name(1);

        if destination.check_duplicate_filename
            && ctx.sinks.find_by_name(&destination.id, &name).await?.is_some()
        {
            return Err(ConduitError::DuplicateExport(name));
        }

        let transformer = ctx.transformers.create(destination.transformer.as_deref())?;
        let foldable = resolve_foldable(&ctx, &params, transformer.as_ref()).await?;

        log_export_start!(&destination.id, sink_id, &name);
        let lazy = destination.lazy_open;
        self.active = Some(ActiveExport {
            generator_ctx: GeneratorContext {
                destination_id: destination.id.clone(),
                format: format.clone(),
                foldable,
                encoding,
            },
            sink: SinkRecord::new(sink_id, destination.id.clone(), name),
            destination,
            format,
            names,
            transformer,
            generator: None,
            output: None,
            part: 0,
            records_in_part: 0,
            bytes_written: 0,
            size_known: true,
            started: Instant::now(),
        });
        self.state = SessionState::Lazy;

        if !lazy {
            if let Err(e) = self.force_open().await {
                self.active = None;
                self.state = SessionState::Closed;
                return Err(e);
            }
        }
        Ok(sink_id)
    }

    /// Opens the first part of a lazy session
    async fn force_open(&mut self) -> Result<()> {
        match self.state {
            SessionState::Opened => Ok(()),
            SessionState::Closed => Err(ConduitError::Sequencing(
                "session is not open".to_string(),
            )),
            SessionState::Lazy => {
                let ctx = Arc::clone(&self.ctx);
                let active = self.active_mut()?;
                active.open_part(&ctx).await?;
                self.state = SessionState::Opened;

                let active = self.active_mut()?;
                match active.transformer.header_data() {
                    Ok(header) => active.emit_all(&ctx, header).await,
                    Err(e) if e.is_record_level() => {
                        warn!(sink_id = %active.sink.id, error = %e, "Skipping header records");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn active_mut(&mut self) -> Result<&mut ActiveExport> {
        self.active
            .as_mut()
            .ok_or_else(|| ConduitError::Sequencing("session is not open".to_string()))
    }

    /// Raw output stream of the current part
    ///
    /// # Errors
    ///
    /// [`ConduitError::Sequencing`] on a closed session;
    /// [`ConduitError::Unsupported`] when the output has no raw stream.
    pub async fn output_stream(&mut self) -> Result<&mut (dyn AsyncWrite + Send + Unpin)> {
        self.force_open().await?;
        let output = self
            .active_mut()?
            .output
            .as_mut()
            .ok_or_else(|| ConduitError::Sequencing("export part is not open".to_string()))?;
        output.output_stream()
    }

    /// Transforms and writes one record
    ///
    /// Records the transformer or generator cannot handle are logged and
    /// skipped; destination failures abort.
    pub async fn store(
        &mut self,
        record_ref: Option<&str>,
        partition_key: &str,
        record_key: &str,
        record: Value,
    ) -> Result<()> {
        self.force_open().await?;
        let ctx = Arc::clone(&self.ctx);
        let active = self.active_mut()?;
        active.sink.source_count += 1;

        let mapped = match active.transformer.transform_data(record) {
            Ok(mapped) => mapped,
            Err(e) if e.is_record_level() => {
                warn!(
                    sink_id = %active.sink.id,
                    record_key = %record_key,
                    error = %e,
                    "Skipping record that could not be transformed"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for record in mapped {
            active
                .emit(
                    &ctx,
                    Outgoing {
                        record_ref,
                        partition_key,
                        record_key,
                        record,
                        synthetic: false,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Chunk size for loading entries into this export
    pub fn chunk_size(&self) -> Result<usize> {
        self.active
            .as_ref()
            .map(|a| a.destination.effective_chunk_size())
            .ok_or_else(|| ConduitError::Sequencing("chunk_size() requires an open session".to_string()))
    }

    /// Finalizes the export and persists its sink record
    ///
    /// Bookkeeping runs even when closing the destination fails; that
    /// failure is returned afterwards. Closing a closed session is a no-op.
    pub async fn close(&mut self) -> Result<Option<SinkRecord>> {
        if self.state == SessionState::Closed {
            warn!("close() called on a closed export session");
            return Ok(None);
        }

        let ctx = Arc::clone(&self.ctx);
        let was_lazy = self.state == SessionState::Lazy;
        let mut active = self
            .active
            .take()
            .ok_or_else(|| ConduitError::Sequencing("session is not open".to_string()))?;
        self.state = SessionState::Closed;

        let close_result = if was_lazy {
            Ok(())
        } else {
            active.finish(&ctx).await
        };
        if let Err(e) = &close_result {
            warn!(sink_id = %active.sink.id, error = %e, "Closing export destination failed");
        }

        let policy = active.relay_policy();
        let elapsed = active.started.elapsed();
        let sink = &mut active.sink;
        sink.transfer_status = match (&close_result, policy) {
            (Err(_), _) => TransferStatus::ResponseError,
            (Ok(()), ExecutionPolicy::Scheduled | ExecutionPolicy::Asynchronous) => {
                TransferStatus::ReadyToExport
            }
            (Ok(()), ExecutionPolicy::None) => TransferStatus::ResponseOk,
        };
        sink.size_bytes = (active.destination.record_file_size
            && active.size_known
            && sink.file_count > 0)
            .then_some(active.bytes_written);
        sink.processing_time_ms = elapsed.as_millis() as u64;
        sink.completed_at = Some(Utc::now());

        let persisted = ctx.sinks.store_new_sink(sink).await;
        if let Err(e) = &persisted {
            warn!(sink_id = %sink.id, error = %e, "Failed to persist sink record");
        }
        close_result?;
        persisted?;

        if policy == ExecutionPolicy::Asynchronous {
            enqueue_follow_up(&ctx, &active.destination, sink).await;
        }

        log_export_complete!(sink.id, sink.mapped_count, elapsed);
        Ok(Some(active.sink))
    }
}

impl fmt::Debug for ExportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportSession")
            .field("state", &self.state)
            .field("sink_id", &self.sink_id())
            .finish()
    }
}

/// Format from the params and the destination; at least one must be set and
/// they must agree (case-insensitive)
fn negotiate_format(params: &ExportParams, destination: &DestinationConfig) -> Result<String> {
    match (params.format.as_deref(), destination.format.as_deref()) {
        (None, None) => Err(ConduitError::FormatUnspecified(destination.id.to_string())),
        (Some(requested), Some(configured)) if !requested.eq_ignore_ascii_case(configured) => {
            Err(ConduitError::FormatMismatch {
                requested: requested.to_string(),
                configured: configured.to_string(),
            })
        }
        (Some(format), _) | (None, Some(format)) => Ok(format.to_lowercase()),
    }
}

/// Grid selection, then the transformer's, then the explicit params
async fn resolve_foldable(
    ctx: &ExportContext,
    params: &ExportParams,
    transformer: &dyn PreOutputTransformer,
) -> Result<FoldableParams> {
    if let (Some(grid_id), Some(source)) = (params.grid_id.as_deref(), &ctx.grid_source) {
        if let Some(foldable) = source.foldable_params(grid_id).await? {
            return Ok(foldable);
        }
        debug!(grid_id = %grid_id, "No foldable parameters for grid");
    }
    if let Some(foldable) = transformer.foldable_params() {
        return Ok(foldable);
    }
    Ok(params.explicit_foldable())
}

/// Enqueues the serialized sink record on the relay route channel
async fn enqueue_follow_up(ctx: &ExportContext, destination: &DestinationConfig, sink: &SinkRecord) {
    let (Some(route), Some(delivery)) = (&destination.relay, &ctx.delivery) else {
        warn!(
            sink_id = %sink.id,
            "Asynchronous relay configured but no delivery service available"
        );
        return;
    };

    let payload = match serde_json::to_string(sink) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(sink_id = %sink.id, error = %e, "Cannot serialize sink record for relay");
            return;
        }
    };
    if let Err(e) = delivery
        .send_async(
            &route.channel,
            payload,
            Some(format!("sink:{}", sink.id)),
            destination.id.as_str(),
            &sink.id.to_string(),
        )
        .await
    {
        warn!(sink_id = %sink.id, error = %e, "Failed to enqueue relay follow-up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::MemoryStore;

    fn destination(format: Option<&str>) -> DestinationConfig {
        let mut d = DestinationConfig::new(DestinationId::new("out").unwrap());
        d.output = "memory".to_string();
        d.format = format.map(str::to_string);
        d
    }

    fn params(format: Option<&str>) -> ExportParams {
        let p = ExportParams::new(DestinationId::new("out").unwrap());
        match format {
            Some(f) => p.with_format(f),
            None => p,
        }
    }

    #[test]
    fn test_negotiate_format() {
        assert_eq!(negotiate_format(&params(None), &destination(Some("CSV"))).unwrap(), "csv");
        assert_eq!(negotiate_format(&params(Some("jsonl")), &destination(None)).unwrap(), "jsonl");
        assert_eq!(
            negotiate_format(&params(Some("csv")), &destination(Some("CSV"))).unwrap(),
            "csv"
        );

        let err = negotiate_format(&params(None), &destination(None)).unwrap_err();
        assert!(err.to_string().contains("format unspecified"));

        let err = negotiate_format(&params(Some("csv")), &destination(Some("jsonl"))).unwrap_err();
        assert!(matches!(err, ConduitError::FormatMismatch { .. }));
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ExportContext::new(vec![destination(Some("csv"))], store));
        let mut session = ExportSession::new(ctx);

        let err = session
            .store(None, "p", "k", serde_json::json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Sequencing(_)));
        assert!(matches!(
            session.output_stream().await.err().unwrap(),
            ConduitError::Sequencing(_)
        ));
        assert!(session.chunk_size().is_err());
        assert!(session.close().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_twice_is_sequencing_error() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ExportContext::new(vec![destination(Some("csv"))], store));
        let mut session = ExportSession::new(ctx);

        session.open(params(None)).await.unwrap();
        assert_eq!(session.state(), SessionState::Opened);
        let err = session.open(params(None)).await.unwrap_err();
        assert!(matches!(err, ConduitError::Sequencing(_)));
    }

    #[tokio::test]
    async fn test_unknown_encoding_fails_open() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ExportContext::new(vec![destination(Some("csv"))], store));
        let mut session = ExportSession::new(ctx);
        let err = session
            .open(params(None).with_encoding("EBCDIC"))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
