//! Integration tests for export sessions
//!
//! Sessions write through the in-memory output so every part can be read
//! back, and persist their sinks in the in-memory store.

use async_trait::async_trait;
use conduit::adapters::broker::{self, Broker};
use conduit::adapters::output::{OutputRegistry, OutputResource};
use conduit::adapters::persistence::{create_stores, MemoryStore, SinkStore};
use conduit::adapters::sender::SenderRegistry;
use conduit::config::{
    parse_config, AsyncChannel, DeliveryDefaults, DestinationConfig, ExecutionPolicy, QueueConfig,
    RelayRoute,
};
use conduit::core::delivery::{DeliveryService, SinkStatusListener};
use conduit::core::export::{chunk_count, ExportContext, ExportParams, ExportSession, SessionState};
use conduit::core::transform::{
    FoldableParams, PreOutputTransformer, StaticGridSource, TransformerRegistry,
};
use conduit::domain::{
    ChannelId, ConduitError, DestinationId, QueueId, Result, TransferStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

fn destination_id() -> DestinationId {
    DestinationId::new("out").unwrap()
}

fn memory_destination(format: Option<&str>) -> DestinationConfig {
    let mut d = DestinationConfig::new(destination_id());
    d.output = "memory".to_string();
    d.format = format.map(str::to_string);
    d
}

fn context(destination: DestinationConfig) -> (Arc<ExportContext>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(ExportContext::new(vec![destination], store.clone()));
    (ctx, store)
}

async fn store_people(session: &mut ExportSession, count: usize) {
    for i in 1..=count {
        session
            .store(
                Some(&format!("ref-{i}")),
                "people",
                &i.to_string(),
                json!({"id": i, "name": format!("person {i}")}),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_format_unspecified_fails_open_without_a_sink() {
    let (ctx, store) = context(memory_destination(None));
    let mut session = ExportSession::new(ctx);

    let err = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap_err();
    assert!(matches!(err, ConduitError::FormatUnspecified(_)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(store.list_sinks(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_format_from_params_when_destination_has_none() {
    let (ctx, _store) = context(memory_destination(None));
    let mut session = ExportSession::new(ctx.clone());

    session
        .open(ExportParams::new(destination_id()).with_format("JSONL"))
        .await
        .unwrap();
    store_people(&mut session, 2).await;
    let sink = session.close().await.unwrap().unwrap();

    let content = ctx
        .outputs()
        .memory_store()
        .get_string(&sink.destination_name)
        .unwrap();
    assert_eq!(sink.destination_name, "out_1.jsonl");
    assert_eq!(content.lines().count(), 2);
    assert!(content.starts_with("{\"id\":1"));
}

#[tokio::test]
async fn test_csv_export_persists_finalized_sink() {
    let (ctx, store) = context(memory_destination(Some("csv")));
    let mut session = ExportSession::new(ctx.clone());

    let sink_id = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Opened);
    assert_eq!(session.sink_id(), Some(sink_id));
    store_people(&mut session, 3).await;

    let sink = session.close().await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(sink.id, sink_id);
    assert_eq!(sink.source_count, 3);
    assert_eq!(sink.mapped_count, 3);
    assert_eq!(sink.file_count, 1);
    assert_eq!(sink.transfer_status, TransferStatus::ResponseOk);
    assert!(sink.is_finalized());

    let content = ctx.outputs().memory_store().get_string("out_1.csv").unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["id,name", "1,person 1", "2,person 2", "3,person 3"]);
    assert_eq!(sink.size_bytes, Some(content.len() as u64));

    let persisted = store.get_data_sink(sink_id).await.unwrap().unwrap();
    assert_eq!(persisted, sink);
}

#[tokio::test]
async fn test_format_mismatch_is_configuration_error() {
    let (ctx, _store) = context(memory_destination(Some("csv")));
    let mut session = ExportSession::new(ctx);

    let err = session
        .open(ExportParams::new(destination_id()).with_format("jsonl"))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_rollover_splits_parts() {
    let mut destination = memory_destination(Some("csv"));
    destination.max_records_per_file = Some(2);
    let (ctx, _store) = context(destination);
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut session, 5).await;
    let sink = session.close().await.unwrap().unwrap();

    assert_eq!(sink.file_count, 3);
    assert_eq!(sink.mapped_count, 5);

    let outputs = ctx.outputs().memory_store();
    assert_eq!(
        outputs.names(),
        vec!["out_1.csv", "out_1_2.csv", "out_1_3.csv"]
    );
    // every part carries its own header
    for (name, rows) in [("out_1.csv", 2), ("out_1_2.csv", 2), ("out_1_3.csv", 1)] {
        let content = outputs.get_string(name).unwrap();
        assert!(content.starts_with("id,name\n"), "{name}");
        assert_eq!(content.lines().count(), rows + 1, "{name}");
    }

    let total: usize = outputs
        .names()
        .iter()
        .map(|n| outputs.get(n).unwrap().len())
        .sum();
    assert_eq!(sink.size_bytes, Some(total as u64));
}

#[tokio::test]
async fn test_lazy_session_without_records_writes_nothing() {
    let mut destination = memory_destination(Some("csv"));
    destination.lazy_open = true;
    let (ctx, store) = context(destination);
    let mut session = ExportSession::new(ctx.clone());

    let sink_id = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Lazy);

    let sink = session.close().await.unwrap().unwrap();
    assert_eq!(sink.file_count, 0);
    assert_eq!(sink.size_bytes, None);
    assert!(ctx.outputs().memory_store().names().is_empty());
    assert!(store.get_data_sink(sink_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_lazy_session_opens_on_first_record() {
    let mut destination = memory_destination(Some("jsonl"));
    destination.lazy_open = true;
    let (ctx, _store) = context(destination);
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut session, 1).await;
    assert_eq!(session.state(), SessionState::Opened);

    let sink = session.close().await.unwrap().unwrap();
    assert_eq!(sink.file_count, 1);
    assert!(ctx.outputs().memory_store().get("out_1.jsonl").is_some());
}

#[tokio::test]
async fn test_duplicate_filename_is_refused() {
    let mut destination = memory_destination(Some("csv"));
    destination.name_pattern = "{destination}.{ext}".to_string();
    destination.check_duplicate_filename = true;
    let (ctx, _store) = context(destination);

    let mut first = ExportSession::new(ctx.clone());
    first.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut first, 1).await;
    first.close().await.unwrap();

    let mut second = ExportSession::new(ctx);
    let err = second
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap_err();
    assert!(matches!(err, ConduitError::DuplicateExport(ref name) if name == "out.csv"));
    assert_eq!(second.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_session_can_be_reused_after_close() {
    let (ctx, _store) = context(memory_destination(Some("csv")));
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut session, 1).await;
    let first = session.close().await.unwrap().unwrap();

    session.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut session, 1).await;
    let second = session.close().await.unwrap().unwrap();

    assert!(second.id > first.id);
    assert_eq!(ctx.outputs().memory_store().names().len(), 2);
}

#[tokio::test]
async fn test_store_after_close_is_sequencing_error() {
    let (ctx, _store) = context(memory_destination(Some("csv")));
    let mut session = ExportSession::new(ctx);

    session.open(ExportParams::new(destination_id())).await.unwrap();
    session.close().await.unwrap();

    let err = session
        .store(None, "p", "k", json!({"id": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, ConduitError::Sequencing(_)));
    // a second close is harmless
    assert!(session.close().await.unwrap().is_none());
}

#[tokio::test]
async fn test_non_object_rows_are_skipped_by_csv() {
    let (ctx, _store) = context(memory_destination(Some("csv")));
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    session.store(None, "p", "1", json!({"id": 1})).await.unwrap();
    session.store(None, "p", "2", json!([1, 2])).await.unwrap();
    session.store(None, "p", "3", json!({"id": 3})).await.unwrap();
    let sink = session.close().await.unwrap().unwrap();

    assert_eq!(sink.source_count, 3);
    assert_eq!(sink.mapped_count, 2);
    let content = ctx.outputs().memory_store().get_string("out_1.csv").unwrap();
    assert_eq!(content, "id\n1\n3\n");
}

#[tokio::test]
async fn test_explicit_fields_select_columns() {
    let (ctx, _store) = context(memory_destination(Some("csv")));
    let mut session = ExportSession::new(ctx.clone());

    session
        .open(ExportParams::new(destination_id()).with_fields(["name"]))
        .await
        .unwrap();
    store_people(&mut session, 2).await;
    session.close().await.unwrap();

    let content = ctx.outputs().memory_store().get_string("out_1.csv").unwrap();
    assert_eq!(content, "name\nperson 1\nperson 2\n");
}

#[tokio::test]
async fn test_audit_copies_every_record() {
    let mut destination = memory_destination(Some("jsonl"));
    destination.audit = true;
    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(
        ExportContext::new(vec![destination], store.clone()).with_audit(store.clone()),
    );
    let mut session = ExportSession::new(ctx);

    let sink_id = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap();
    store_people(&mut session, 3).await;
    session.close().await.unwrap();

    let copies = store.audit_copies();
    assert_eq!(copies.len(), 3);
    assert!(copies.iter().all(|c| c.sink_id == sink_id));
    assert_eq!(copies[2].record["id"], 3);
}

/// Output whose close always fails
struct FailingOutput {
    buffer: Vec<u8>,
}

#[async_trait]
impl OutputResource for FailingOutput {
    async fn open(&mut self, _destination: &DestinationConfig, _name: &str) -> Result<()> {
        Ok(())
    }

    fn output_stream(&mut self) -> Result<&mut (dyn AsyncWrite + Send + Unpin)> {
        Ok(&mut self.buffer)
    }

    async fn write(&mut self, data: &[u8], _partition_key: &str, _record_key: &str) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Err(ConduitError::Destination("remote share went away".to_string()))
    }
}

#[tokio::test]
async fn test_close_failure_still_persists_sink() {
    let mut destination = memory_destination(Some("csv"));
    destination.output = "flaky".to_string();

    let mut outputs = OutputRegistry::with_defaults();
    outputs.register("flaky", || Box::new(FailingOutput { buffer: Vec::new() }));

    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(ExportContext::new(vec![destination], store.clone()).with_outputs(outputs));
    let mut session = ExportSession::new(ctx);

    let sink_id = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap();
    store_people(&mut session, 2).await;

    let err = session.close().await.unwrap_err();
    assert!(matches!(err, ConduitError::Destination(_)));
    assert_eq!(session.state(), SessionState::Closed);

    let persisted = store.get_data_sink(sink_id).await.unwrap().unwrap();
    assert_eq!(persisted.transfer_status, TransferStatus::ResponseError);
    assert_eq!(persisted.mapped_count, 2);
    assert!(persisted.is_finalized());
}

#[tokio::test]
async fn test_encryption_id_rejected_by_memory_output() {
    let mut destination = memory_destination(Some("csv"));
    destination.encryption_id = Some("key-7".to_string());
    let (ctx, store) = context(destination);
    let mut session = ExportSession::new(ctx);

    let err = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(store.list_sinks(10).await.unwrap().is_empty());
}

const RELAY_BROKER: &str = "memory://export-relay";
const RELAY_TOPIC: &str = "conduit.relay";

fn relay_channels() -> Vec<AsyncChannel> {
    ["export-mirror", "export-followup"]
        .into_iter()
        .map(|id| AsyncChannel {
            id: ChannelId::new(id).unwrap(),
            active: true,
            queue: Some(QueueId::new("relay").unwrap()),
            idempotency_header: None,
        })
        .collect()
}

#[tokio::test]
async fn test_relay_mirror_and_asynchronous_follow_up() {
    let store = Arc::new(MemoryStore::new());
    let broker = broker::connect(RELAY_BROKER).await.unwrap();
    let delivery = Arc::new(
        DeliveryService::new(
            "tenant-a",
            DeliveryDefaults::default(),
            SenderRegistry::with_defaults(),
            relay_channels(),
            Arc::new(SinkStatusListener::new(store.clone())),
        )
        .with_broker(broker.clone())
        .await,
    );

    let mut queue = QueueConfig::new(QueueId::new("relay").unwrap());
    queue.topic = Some(RELAY_TOPIC.to_string());
    queue.broker_address = Some(RELAY_BROKER.to_string());
    queue.sender = Some("log".to_string());
    queue.poll_interval_ms = Some(10);
    delivery.open_queue(&queue).await.unwrap();

    let mut destination = memory_destination(Some("jsonl"));
    destination.relay_channel = Some(ChannelId::new("export-mirror").unwrap());
    destination.relay = Some(RelayRoute {
        channel: ChannelId::new("export-followup").unwrap(),
        policy: ExecutionPolicy::Asynchronous,
    });
    let ctx = Arc::new(
        ExportContext::new(vec![destination], store.clone()).with_delivery(delivery.clone()),
    );
    let mut session = ExportSession::new(ctx);

    let sink_id = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap();
    store_people(&mut session, 2).await;
    let sink = session.close().await.unwrap().unwrap();
    assert_eq!(sink.transfer_status, TransferStatus::ReadyToExport);

    // a separate consumer sees the whole topic regardless of the worker
    let records = broker.poll(RELAY_TOPIC, "inspector", 10).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].message.channel_id.as_str(), "export-mirror");
    assert_eq!(records[0].message.partition_key, "out:people");
    assert_eq!(records[0].message.object_ref.as_deref(), Some("ref-1"));
    assert_eq!(records[1].message.record_key, "2");

    let follow_up = &records[2].message;
    assert_eq!(follow_up.channel_id.as_str(), "export-followup");
    assert_eq!(follow_up.object_ref, Some(format!("sink:{sink_id}")));
    let payload: serde_json::Value = serde_json::from_str(&follow_up.payload).unwrap();
    assert_eq!(payload["mapped_count"], 2);

    // the listener records the delivered follow-up on the sink
    let mut status = TransferStatus::ReadyToExport;
    for _ in 0..300 {
        status = store
            .get_data_sink(sink_id)
            .await
            .unwrap()
            .unwrap()
            .transfer_status;
        if status == TransferStatus::ResponseOk {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, TransferStatus::ResponseOk);
    delivery.shutdown().await;
}

#[tokio::test]
async fn test_scheduled_relay_leaves_sink_ready() {
    let mut destination = memory_destination(Some("csv"));
    destination.relay = Some(RelayRoute {
        channel: ChannelId::new("export-followup").unwrap(),
        policy: ExecutionPolicy::Scheduled,
    });
    let (ctx, store) = context(destination);
    let mut session = ExportSession::new(ctx);

    let sink_id = session
        .open(ExportParams::new(destination_id()))
        .await
        .unwrap();
    store_people(&mut session, 1).await;
    session.close().await.unwrap();

    let persisted = store.get_data_sink(sink_id).await.unwrap().unwrap();
    assert_eq!(persisted.transfer_status, TransferStatus::ReadyToExport);
}

#[test]
fn test_chunk_count_covers_every_reference() {
    for (len, size) in [(0, 10), (1, 10), (10, 10), (11, 10), (25, 4), (7, 1)] {
        let count = chunk_count(len, size);
        assert!(count * size >= len, "len {len} size {size}");
        if len > 0 {
            assert!((count - 1) * size < len, "len {len} size {size}");
        } else {
            assert_eq!(count, 0);
        }
    }
}

fn jsonl_rows(ctx: &ExportContext, name: &str) -> Vec<serde_json::Value> {
    ctx.outputs()
        .memory_store()
        .get_string(name)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_trailer_closes_full_last_part() {
    let mut destination = memory_destination(Some("jsonl"));
    destination.max_records_per_file = Some(2);
    destination.transformer = Some("trailer".to_string());
    let (ctx, _store) = context(destination);
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut session, 2).await;
    let sink = session.close().await.unwrap().unwrap();

    assert_eq!(ctx.outputs().memory_store().names(), vec!["out_1.jsonl"]);
    assert_eq!(sink.file_count, 1);
    assert_eq!(sink.source_count, 2);
    assert_eq!(sink.mapped_count, 2);

    let rows = jsonl_rows(&ctx, "out_1.jsonl");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2], json!({"_trailer": true, "record_count": 2, "source_count": 2}));
}

#[tokio::test]
async fn test_trailer_counts_match_sink_across_parts() {
    let mut destination = memory_destination(Some("jsonl"));
    destination.max_records_per_file = Some(2);
    destination.transformer = Some("trailer".to_string());
    let (ctx, _store) = context(destination);
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    store_people(&mut session, 4).await;
    let sink = session.close().await.unwrap().unwrap();

    assert_eq!(
        ctx.outputs().memory_store().names(),
        vec!["out_1.jsonl", "out_1_2.jsonl"]
    );
    assert_eq!(sink.file_count, 2);
    assert_eq!(sink.mapped_count, 4);
    assert_eq!(jsonl_rows(&ctx, "out_1.jsonl").len(), 2);

    let last = jsonl_rows(&ctx, "out_1_2.jsonl");
    assert_eq!(last.len(), 3);
    assert_eq!(last[2]["record_count"], json!(sink.mapped_count));
}

#[tokio::test]
async fn test_transformer_skips_and_expands_records() {
    let mut destination = memory_destination(Some("jsonl"));
    destination.transformer = Some("explode:items".to_string());
    let (ctx, _store) = context(destination);
    let mut session = ExportSession::new(ctx.clone());

    session.open(ExportParams::new(destination_id())).await.unwrap();
    let inputs = [
        json!({"id": 1, "items": ["a", "b", "c"]}),
        // not an object, the transformer refuses it
        json!(["stray"]),
        json!({"id": 3, "items": []}),
        json!({"id": 4, "items": "d"}),
    ];
    for (i, record) in inputs.into_iter().enumerate() {
        session
            .store(None, "orders", &i.to_string(), record)
            .await
            .unwrap();
    }
    let sink = session.close().await.unwrap().unwrap();

    assert_eq!(sink.source_count, 4);
    assert_eq!(sink.mapped_count, 4);
    assert_eq!(sink.transfer_status, TransferStatus::ResponseOk);
    assert_eq!(
        jsonl_rows(&ctx, &sink.destination_name),
        vec![
            json!({"id": 1, "items": "a"}),
            json!({"id": 1, "items": "b"}),
            json!({"id": 1, "items": "c"}),
            json!({"id": 4, "items": "d"}),
        ]
    );
}

/// Identity transformer that prefers the `name` column
struct NamesOnly;

impl PreOutputTransformer for NamesOnly {
    fn transform_data(&mut self, record: serde_json::Value) -> Result<Vec<serde_json::Value>> {
        Ok(vec![record])
    }

    fn foldable_params(&self) -> Option<FoldableParams> {
        Some(FoldableParams::with_fields(["name"]))
    }
}

fn grid_context(transformer: Option<&str>) -> Arc<ExportContext> {
    let mut destination = memory_destination(Some("csv"));
    destination.transformer = transformer.map(str::to_string);
    let mut transformers = TransformerRegistry::with_defaults();
    transformers.register("names-only", |_| Ok(Box::new(NamesOnly)));
    let grids = StaticGridSource::new().with_grid(
        "ids",
        FoldableParams::with_fields(["id"]).with_label("id", "Person #"),
    );
    Arc::new(
        ExportContext::new(vec![destination], Arc::new(MemoryStore::new()))
            .with_transformers(transformers)
            .with_grid_source(Arc::new(grids)),
    )
}

async fn export_header(ctx: Arc<ExportContext>, params: ExportParams) -> String {
    let mut session = ExportSession::new(ctx.clone());
    session.open(params).await.unwrap();
    store_people(&mut session, 1).await;
    let sink = session.close().await.unwrap().unwrap();
    let content = ctx
        .outputs()
        .memory_store()
        .get_string(&sink.destination_name)
        .unwrap();
    content.lines().next().unwrap().to_string()
}

#[tokio::test]
async fn test_field_selection_precedence() {
    // a known grid wins over the transformer and the explicit fields
    let params = ExportParams::new(destination_id())
        .with_grid("ids")
        .with_fields(["name", "id"]);
    assert_eq!(export_header(grid_context(Some("names-only")), params).await, "Person #");

    // an unknown grid falls back to the transformer
    let params = ExportParams::new(destination_id())
        .with_grid("missing")
        .with_fields(["name", "id"]);
    assert_eq!(export_header(grid_context(Some("names-only")), params).await, "name");

    // without either, the explicit fields apply
    let params = ExportParams::new(destination_id())
        .with_grid("missing")
        .with_fields(["name", "id"]);
    assert_eq!(export_header(grid_context(None), params).await, "name,id");
}

#[tokio::test]
async fn test_configured_grids_select_columns() {
    let config = parse_config(
        r#"
[application]

[[destinations]]
id = "out"
output = "memory"
format = "csv"

[[grids]]
id = "compact"
fields = ["name"]
labels = { name = "Full name" }
"#,
    )
    .unwrap();
    let stores = create_stores(&config).await.unwrap();
    let ctx = Arc::new(ExportContext::from_config(&config, &stores, None).unwrap());

    let params = ExportParams::new(destination_id()).with_grid("compact");
    assert_eq!(export_header(ctx, params).await, "Full name");
}
