//! Integration tests for rotating bucket exports
//!
//! Counters are seeded directly through the store so each test starts from a
//! known ring position, then the coordinator runs against the in-memory
//! output.

use conduit::adapters::persistence::{BucketStore, MemoryStore};
use conduit::config::{BucketConfig, BucketQualifierConfig, DestinationConfig};
use conduit::core::bucket::{BucketExportCoordinator, BucketExportRequest};
use conduit::core::export::ExportContext;
use conduit::domain::{BucketEntry, DestinationId, EntryMode, Qualifier, ResponseCode};
use serde_json::{json, Value};
use std::sync::Arc;

fn qualifier() -> Qualifier {
    Qualifier::new("INVOICES").unwrap()
}

fn entry(record_ref: &str) -> BucketEntry {
    BucketEntry {
        record_ref: record_ref.to_string(),
        partition_key: "invoices".to_string(),
        record_key: record_ref.to_string(),
        mode: EntryMode::Upsert,
        payload: json!({"invoice": record_ref}),
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    exports: Arc<ExportContext>,
    coordinator: BucketExportCoordinator,
}

fn fixture(configure: impl FnOnce(&mut DestinationConfig)) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let mut destination = DestinationConfig::new(DestinationId::new("invoices").unwrap());
    destination.output = "memory".to_string();
    destination.format = Some("jsonl".to_string());
    configure(&mut destination);
    let exports = Arc::new(ExportContext::new(vec![destination], store.clone()));

    let config = BucketConfig {
        grace_period_ms: 0,
        qualifiers: vec![BucketQualifierConfig {
            qualifier: qualifier(),
            destination: DestinationId::new("invoices").unwrap(),
            max_buckets: 4,
            switch_bucket: true,
            delete_before_switch: true,
        }],
    };
    let coordinator = BucketExportCoordinator::new(store.clone(), exports.clone(), &config);
    Fixture {
        store,
        exports,
        coordinator,
    }
}

impl Fixture {
    /// Exported records of a memory part, one JSON value per line
    fn exported(&self, name: &str) -> Vec<Value> {
        self.exports
            .outputs()
            .memory_store()
            .get_string(name)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn exported_refs(&self, name: &str) -> Vec<String> {
        self.exported(name)
            .iter()
            .map(|v| v["invoice"].as_str().unwrap().to_string())
            .collect()
    }
}

/// Moves the ring to `current = 2` with no marker
async fn seed_current_two(store: &MemoryStore) {
    store.load_counter(&qualifier(), 4).await.unwrap();
    store.switch_bucket(&qualifier(), 1).await.unwrap();
    store.clear_in_progress(&qualifier()).await.unwrap();
    store.switch_bucket(&qualifier(), 2).await.unwrap();
    store.clear_in_progress(&qualifier()).await.unwrap();
}

#[tokio::test]
async fn test_normal_rotation_exports_previous_bucket() {
    let f = fixture(|_| {});
    seed_current_two(&f.store).await;
    for r in ["inv-1", "inv-2", "inv-3"] {
        assert_eq!(f.coordinator.add_entry(&qualifier(), &entry(r)).await.unwrap(), 2);
    }
    // leftovers from a previous lap of the ring in bucket 3
    f.store.switch_bucket(&qualifier(), 3).await.unwrap();
    f.store.append_entry(&qualifier(), &entry("stale")).await.unwrap();
    // rotation is refused while a marker is set
    f.store.switch_bucket(&qualifier(), 2).await.unwrap_err();
    f.store.clear_in_progress(&qualifier()).await.unwrap();
    let back = f.store.switch_bucket(&qualifier(), 2).await.unwrap();
    assert_eq!(back.current, 3);
    f.store.clear_in_progress(&qualifier()).await.unwrap();

    let response = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(response.code, ResponseCode::Ok);
    assert_eq!(response.records_exported, 3);

    let counter = f.store.counter(&qualifier()).unwrap();
    assert_eq!(counter.current, 3);
    assert_eq!(counter.in_progress, None);

    // bucket 3 was emptied before it became current
    assert_eq!(f.store.bucket_len(&qualifier(), 3), 0);
    let sink_id = response.sink_id.unwrap();
    assert_eq!(
        f.exported_refs(&format!("invoices_{sink_id}.jsonl")),
        vec!["inv-1", "inv-2", "inv-3"]
    );
}

#[tokio::test]
async fn test_crash_recovery_reexports_marked_bucket() {
    let f = fixture(|_| {});
    f.store.load_counter(&qualifier(), 4).await.unwrap();
    f.store.switch_bucket(&qualifier(), 1).await.unwrap();
    f.store.clear_in_progress(&qualifier()).await.unwrap();
    for r in ["inv-1", "inv-2"] {
        f.store.append_entry(&qualifier(), &entry(r)).await.unwrap();
    }
    // rotation happened, the export of bucket 1 never finished
    f.store.switch_bucket(&qualifier(), 2).await.unwrap();
    f.store.append_entry(&qualifier(), &entry("inv-3")).await.unwrap();
    assert_eq!(f.store.counter(&qualifier()).unwrap().in_progress, Some(1));

    let response = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(response.code, ResponseCode::Ok);
    assert_eq!(response.records_exported, 2);

    // no rotation during recovery
    let counter = f.store.counter(&qualifier()).unwrap();
    assert_eq!(counter.current, 2);
    assert_eq!(counter.in_progress, None);
    assert_eq!(f.store.bucket_len(&qualifier(), 2), 1);

    let sink_id = response.sink_id.unwrap();
    assert_eq!(
        f.exported_refs(&format!("invoices_{sink_id}.jsonl")),
        vec!["inv-1", "inv-2"]
    );
}

#[tokio::test]
async fn test_reexport_of_same_bucket_is_identical() {
    let f = fixture(|_| {});
    for r in ["inv-1", "inv-2", "inv-3"] {
        f.coordinator.add_entry(&qualifier(), &entry(r)).await.unwrap();
    }
    let first = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(first.code, ResponseCode::Ok);

    // bucket 0 is still intact after rotation and can be exported again
    let second = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()).with_bucket(0))
        .await;
    assert_eq!(second.code, ResponseCode::Ok);
    assert_ne!(first.sink_id, second.sink_id);

    let first_name = format!("invoices_{}.jsonl", first.sink_id.unwrap());
    let second_name = format!("invoices_{}.jsonl", second.sink_id.unwrap());
    assert_eq!(f.exported(&first_name), f.exported(&second_name));

    // an explicit export leaves the ring alone
    let counter = f.store.counter(&qualifier()).unwrap();
    assert_eq!(counter.current, 1);
    assert_eq!(counter.in_progress, None);
}

#[tokio::test]
async fn test_replaced_entry_is_exported_once_in_latest_position() {
    let f = fixture(|_| {});
    f.coordinator.add_entry(&qualifier(), &entry("inv-1")).await.unwrap();
    f.coordinator.add_entry(&qualifier(), &entry("inv-2")).await.unwrap();
    f.coordinator.add_entry(&qualifier(), &entry("inv-1")).await.unwrap();

    let response = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(response.records_exported, 2);
    let name = format!("invoices_{}.jsonl", response.sink_id.unwrap());
    assert_eq!(f.exported_refs(&name), vec!["inv-2", "inv-1"]);
}

#[tokio::test]
async fn test_export_pages_through_small_chunks() {
    let f = fixture(|d| d.chunk_size = Some(2));
    let refs: Vec<String> = (1..=7).map(|i| format!("inv-{i}")).collect();
    for r in &refs {
        f.coordinator.add_entry(&qualifier(), &entry(r)).await.unwrap();
    }

    let response = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(response.records_exported, 7);
    let name = format!("invoices_{}.jsonl", response.sink_id.unwrap());
    assert_eq!(f.exported_refs(&name), refs);
}

#[tokio::test]
async fn test_entry_mode_is_added_when_configured() {
    let f = fixture(|d| d.include_entry_mode = true);
    f.coordinator.add_entry(&qualifier(), &entry("inv-1")).await.unwrap();
    let mut removed = entry("inv-2");
    removed.mode = EntryMode::Delete;
    f.coordinator.add_entry(&qualifier(), &removed).await.unwrap();

    let response = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    let records = f.exported(&format!("invoices_{}.jsonl", response.sink_id.unwrap()));
    assert_eq!(records[0]["_mode"], "upsert");
    assert_eq!(records[1]["_mode"], "delete");
}

#[tokio::test]
async fn test_marker_is_never_doubled() {
    let f = fixture(|d| d.format = None);
    f.coordinator.add_entry(&qualifier(), &entry("inv-1")).await.unwrap();

    // without any format the export fails after rotating and keeps its marker
    let failed = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(failed.code, ResponseCode::Configuration);
    let counter = f.store.counter(&qualifier()).unwrap();
    assert_eq!((counter.current, counter.in_progress), (1, Some(0)));

    // a second failure must not rotate again
    let failed = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()))
        .await;
    assert_eq!(failed.code, ResponseCode::Configuration);
    let counter = f.store.counter(&qualifier()).unwrap();
    assert_eq!((counter.current, counter.in_progress), (1, Some(0)));

    // the request can supply the format, and recovery completes
    let recovered = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()).with_format("jsonl"))
        .await;
    assert_eq!(recovered.code, ResponseCode::Ok);
    assert_eq!(recovered.records_exported, 1);
    assert_eq!(f.store.counter(&qualifier()).unwrap().in_progress, None);
}

#[tokio::test]
async fn test_concurrent_writers_land_in_exactly_one_bucket() {
    let f = fixture(|_| {});
    for i in 0..5 {
        f.coordinator
            .add_entry(&qualifier(), &entry(&format!("early-{i}")))
            .await
            .unwrap();
    }

    let writers = futures::future::join_all((0..20).map(|i| {
        let coordinator = &f.coordinator;
        async move {
            let e = entry(&format!("late-{i}"));
            tokio::task::yield_now().await;
            coordinator.add_entry(&qualifier(), &e).await.unwrap()
        }
    }));
    let export = f
        .coordinator
        .export_bucket(BucketExportRequest::new(qualifier()));
    let (buckets, response) = tokio::join!(writers, export);

    let in_exported_bucket = buckets.iter().filter(|&&b| b == 0).count();
    assert!(buckets.iter().all(|&b| b == 0 || b == 1));
    assert_eq!(response.records_exported as usize, 5 + in_exported_bucket);
    assert_eq!(
        f.store.bucket_len(&qualifier(), 1),
        buckets.len() - in_exported_bucket
    );
}
