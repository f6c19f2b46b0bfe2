//! PostgreSQL persistence
//!
//! The store expects these objects to exist; it never creates or migrates
//! them:
//!
//! ```sql
//! CREATE SEQUENCE conduit_sink_seq;
//! CREATE TABLE conduit_sinks (
//!     id BIGINT PRIMARY KEY, destination_id TEXT NOT NULL,
//!     destination_name TEXT NOT NULL, transfer_status TEXT NOT NULL,
//!     source_count BIGINT NOT NULL, mapped_count BIGINT NOT NULL,
//!     processing_time_ms BIGINT NOT NULL, size_bytes BIGINT,
//!     file_count INTEGER NOT NULL, created_at TIMESTAMPTZ NOT NULL,
//!     completed_at TIMESTAMPTZ);
//! CREATE TABLE conduit_bucket_counters (
//!     qualifier TEXT PRIMARY KEY, current_bucket INTEGER NOT NULL,
//!     max_buckets INTEGER NOT NULL, in_progress INTEGER);
//! CREATE TABLE conduit_bucket_entries (
//!     qualifier TEXT NOT NULL, bucket INTEGER NOT NULL,
//!     record_ref TEXT NOT NULL, partition_key TEXT NOT NULL,
//!     record_key TEXT NOT NULL, mode TEXT NOT NULL, payload JSONB NOT NULL,
//!     seq BIGSERIAL, PRIMARY KEY (qualifier, bucket, record_ref));
//! CREATE TABLE conduit_audit (
//!     sink_id BIGINT NOT NULL, destination_id TEXT NOT NULL,
//!     record JSONB NOT NULL, stored_at TIMESTAMPTZ NOT NULL);
//! ```
//!
//! Counter rotation runs under `SELECT ... FOR UPDATE`; appends take
//! `FOR SHARE` on the counter row, so no entry can land in a bucket after
//! it has been switched away from.

use super::traits::{AuditStore, BucketStore, SinkStore};
use crate::config::PostgreSQLConfig;
use crate::domain::{
    BucketCounter, BucketEntry, ConduitError, DestinationId, EntryMode, Qualifier, Result,
    SinkId, SinkRecord, TransferStatus,
};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::{NoTls, Row};

const SINK_COLUMNS: &str = "id, destination_id, destination_name, transfer_status, \
     source_count, mapped_count, processing_time_ms, size_bytes, file_count, \
     created_at, completed_at";

/// Pooled PostgreSQL store
pub struct PostgresStore {
    pool: Pool,
    statement_timeout_ms: u64,
}

impl PostgresStore {
    /// Builds the connection pool
    ///
    /// No connection is made until the first query.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unparsable connection string or
    /// TLS setup failures.
    pub fn new(config: &PostgreSQLConfig) -> Result<Self> {
        let mut pg_config: tokio_postgres::Config = config
            .connection_string
            .expose_secret()
            .as_ref()
            .parse()
            .map_err(|e| {
                ConduitError::Configuration(format!("Invalid PostgreSQL connection string: {e}"))
            })?;
        pg_config.ssl_mode(ssl_mode(&config.ssl_mode)?);

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = if config.ssl_mode == "disable" {
            Manager::from_config(pg_config, NoTls, manager_config)
        } else {
            let connector = TlsConnector::builder().build().map_err(|e| {
                ConduitError::Configuration(format!("Failed to build TLS connector: {e}"))
            })?;
            Manager::from_config(pg_config, MakeTlsConnector::new(connector), manager_config)
        };

        let timeout = Some(Duration::from_secs(config.connection_timeout_seconds));
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(timeout)
            .create_timeout(timeout)
            .recycle_timeout(timeout)
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                ConduitError::Persistence(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self {
            pool,
            statement_timeout_ms: config.statement_timeout_seconds * 1000,
        })
    }

    /// Runs `SELECT 1` through the pool
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.client().await?;
        client.query_one("SELECT 1", &[]).await?;
        tracing::info!("PostgreSQL connection test successful");
        Ok(())
    }

    async fn client(&self) -> Result<Object> {
        let client = self.pool.get().await.map_err(|e| {
            ConduitError::Persistence(format!("Failed to get connection from pool: {e}"))
        })?;
        client
            .execute(
                &format!("SET statement_timeout = {}", self.statement_timeout_ms),
                &[],
            )
            .await
            .map_err(|e| {
                ConduitError::Persistence(format!("Failed to set statement timeout: {e}"))
            })?;
        Ok(client)
    }
}

fn ssl_mode(mode: &str) -> Result<SslMode> {
    match mode {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        other => Err(ConduitError::Configuration(format!(
            "Unsupported ssl_mode '{other}'"
        ))),
    }
}

fn sink_from_row(row: &Row) -> Result<SinkRecord> {
    let status: String = row.try_get("transfer_status")?;
    Ok(SinkRecord {
        id: SinkId::new(row.try_get("id")?),
        destination_id: DestinationId::new(row.try_get::<_, String>("destination_id")?)
            .map_err(ConduitError::Persistence)?,
        destination_name: row.try_get("destination_name")?,
        transfer_status: TransferStatus::from_str(&status).map_err(ConduitError::Persistence)?,
        source_count: row.try_get::<_, i64>("source_count")? as u64,
        mapped_count: row.try_get::<_, i64>("mapped_count")? as u64,
        processing_time_ms: row.try_get::<_, i64>("processing_time_ms")? as u64,
        size_bytes: row.try_get::<_, Option<i64>>("size_bytes")?.map(|v| v as u64),
        file_count: row.try_get::<_, i32>("file_count")? as u32,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn counter_from_row(qualifier: &Qualifier, row: &Row) -> Result<BucketCounter> {
    Ok(BucketCounter {
        qualifier: qualifier.clone(),
        current: row.try_get::<_, i32>("current_bucket")? as u32,
        max_buckets: row.try_get::<_, i32>("max_buckets")? as u32,
        in_progress: row.try_get::<_, Option<i32>>("in_progress")?.map(|v| v as u32),
    })
}

fn entry_from_row(row: &Row) -> Result<BucketEntry> {
    let mode: String = row.try_get("mode")?;
    Ok(BucketEntry {
        record_ref: row.try_get("record_ref")?,
        partition_key: row.try_get("partition_key")?,
        record_key: row.try_get("record_key")?,
        mode: EntryMode::from_str(&mode).map_err(ConduitError::Persistence)?,
        payload: row.try_get("payload")?,
    })
}

fn missing_counter(qualifier: &Qualifier) -> ConduitError {
    ConduitError::Bucket(format!("No bucket counter for qualifier '{qualifier}'"))
}

#[async_trait]
impl SinkStore for PostgresStore {
    async fn get_data_sink(&self, id: SinkId) -> Result<Option<SinkRecord>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {SINK_COLUMNS} FROM conduit_sinks WHERE id = $1"),
                &[&id.value()],
            )
            .await?;
        row.as_ref().map(sink_from_row).transpose()
    }

    async fn new_sink_key(&self) -> Result<SinkId> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT nextval('conduit_sink_seq')", &[])
            .await?;
        Ok(SinkId::new(row.try_get(0)?))
    }

    async fn store_new_sink(&self, sink: &SinkRecord) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO conduit_sinks (id, destination_id, destination_name, \
                 transfer_status, source_count, mapped_count, processing_time_ms, size_bytes, \
                 file_count, created_at, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (id) DO UPDATE SET \
                 destination_name = EXCLUDED.destination_name, \
                 transfer_status = EXCLUDED.transfer_status, \
                 source_count = EXCLUDED.source_count, \
                 mapped_count = EXCLUDED.mapped_count, \
                 processing_time_ms = EXCLUDED.processing_time_ms, \
                 size_bytes = EXCLUDED.size_bytes, \
                 file_count = EXCLUDED.file_count, \
                 completed_at = EXCLUDED.completed_at",
                &[
                    &sink.id.value(),
                    &sink.destination_id.as_str(),
                    &sink.destination_name,
                    &sink.transfer_status.as_str(),
                    &(sink.source_count as i64),
                    &(sink.mapped_count as i64),
                    &(sink.processing_time_ms as i64),
                    &sink.size_bytes.map(|v| v as i64),
                    &(sink.file_count as i32),
                    &sink.created_at,
                    &sink.completed_at,
                ],
            )
            .await?;
        tracing::debug!(sink_id = %sink.id, "Stored sink record");
        Ok(())
    }

    async fn find_by_name(
        &self,
        destination: &DestinationId,
        name: &str,
    ) -> Result<Option<SinkRecord>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {SINK_COLUMNS} FROM conduit_sinks \
                     WHERE destination_id = $1 AND destination_name = $2 LIMIT 1"
                ),
                &[&destination.as_str(), &name],
            )
            .await?;
        row.as_ref().map(sink_from_row).transpose()
    }

    async fn update_transfer_status(&self, id: SinkId, status: TransferStatus) -> Result<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE conduit_sinks SET transfer_status = $2 WHERE id = $1",
                &[&id.value(), &status.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(ConduitError::Persistence(format!("Sink {id} not found")));
        }
        Ok(())
    }

    async fn list_sinks(&self, limit: usize) -> Result<Vec<SinkRecord>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!("SELECT {SINK_COLUMNS} FROM conduit_sinks ORDER BY id DESC LIMIT $1"),
                &[&(limit as i64)],
            )
            .await?;
        rows.iter().map(sink_from_row).collect()
    }
}

#[async_trait]
impl BucketStore for PostgresStore {
    async fn load_counter(
        &self,
        qualifier: &Qualifier,
        max_buckets: u32,
    ) -> Result<BucketCounter> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO conduit_bucket_counters (qualifier, current_bucket, max_buckets) \
                 VALUES ($1, 0, $2) ON CONFLICT (qualifier) DO NOTHING",
                &[&qualifier.as_str(), &(max_buckets as i32)],
            )
            .await?;
        let row = client
            .query_one(
                "SELECT current_bucket, max_buckets, in_progress \
                 FROM conduit_bucket_counters WHERE qualifier = $1",
                &[&qualifier.as_str()],
            )
            .await?;
        counter_from_row(qualifier, &row)
    }

    async fn get_refs(&self, qualifier: &Qualifier, bucket: u32) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT record_ref FROM conduit_bucket_entries \
                 WHERE qualifier = $1 AND bucket = $2 ORDER BY seq",
                &[&qualifier.as_str(), &(bucket as i32)],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(ConduitError::from))
            .collect()
    }

    async fn get_entries(
        &self,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
    ) -> Result<Vec<BucketEntry>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT record_ref, partition_key, record_key, mode, payload \
                 FROM conduit_bucket_entries \
                 WHERE qualifier = $1 AND bucket = $2 AND record_ref = ANY($3)",
                &[&qualifier.as_str(), &(bucket as i32), &refs],
            )
            .await?;

        let mut by_ref = HashMap::with_capacity(rows.len());
        for row in &rows {
            let entry = entry_from_row(row)?;
            by_ref.insert(entry.record_ref.clone(), entry);
        }
        Ok(refs.iter().filter_map(|r| by_ref.remove(r)).collect())
    }

    async fn get_modes(
        &self,
        qualifier: &Qualifier,
        bucket: u32,
        refs: &[String],
    ) -> Result<HashMap<String, EntryMode>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT record_ref, mode FROM conduit_bucket_entries \
                 WHERE qualifier = $1 AND bucket = $2 AND record_ref = ANY($3)",
                &[&qualifier.as_str(), &(bucket as i32), &refs],
            )
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, EntryMode)> {
                let record_ref: String = row.try_get(0)?;
                let mode: String = row.try_get(1)?;
                let mode = EntryMode::from_str(&mode).map_err(ConduitError::Persistence)?;
                Ok((record_ref, mode))
            })
            .collect()
    }

    async fn delete_bucket_contents(&self, qualifier: &Qualifier, bucket: u32) -> Result<u64> {
        let client = self.client().await?;
        let deleted = client
            .execute(
                "DELETE FROM conduit_bucket_entries WHERE qualifier = $1 AND bucket = $2",
                &[&qualifier.as_str(), &(bucket as i32)],
            )
            .await?;
        Ok(deleted)
    }

    async fn switch_bucket(&self, qualifier: &Qualifier, new_bucket: u32) -> Result<BucketCounter> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let row = tx
            .query_opt(
                "SELECT current_bucket, max_buckets, in_progress \
                 FROM conduit_bucket_counters WHERE qualifier = $1 FOR UPDATE",
                &[&qualifier.as_str()],
            )
            .await?
            .ok_or_else(|| missing_counter(qualifier))?;
        let before = counter_from_row(qualifier, &row)?;
        if let Some(pending) = before.in_progress {
            return Err(ConduitError::Bucket(format!(
                "Qualifier '{qualifier}' still has bucket {pending} in progress"
            )));
        }

        tx.execute(
            "UPDATE conduit_bucket_counters SET current_bucket = $2, in_progress = $3 \
             WHERE qualifier = $1",
            &[
                &qualifier.as_str(),
                &(new_bucket as i32),
                &(before.current as i32),
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(before)
    }

    async fn mark_in_progress(&self, qualifier: &Qualifier, bucket: u32) -> Result<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE conduit_bucket_counters SET in_progress = $2 WHERE qualifier = $1",
                &[&qualifier.as_str(), &(bucket as i32)],
            )
            .await?;
        if updated == 0 {
            return Err(missing_counter(qualifier));
        }
        Ok(())
    }

    async fn clear_in_progress(&self, qualifier: &Qualifier) -> Result<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE conduit_bucket_counters SET in_progress = NULL WHERE qualifier = $1",
                &[&qualifier.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(missing_counter(qualifier));
        }
        Ok(())
    }

    async fn append_entry(&self, qualifier: &Qualifier, entry: &BucketEntry) -> Result<u32> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let current: i32 = tx
            .query_opt(
                "SELECT current_bucket FROM conduit_bucket_counters \
                 WHERE qualifier = $1 FOR SHARE",
                &[&qualifier.as_str()],
            )
            .await?
            .ok_or_else(|| missing_counter(qualifier))?
            .try_get(0)?;

        tx.execute(
            "DELETE FROM conduit_bucket_entries \
             WHERE qualifier = $1 AND bucket = $2 AND record_ref = $3",
            &[&qualifier.as_str(), &current, &entry.record_ref],
        )
        .await?;
        tx.execute(
            "INSERT INTO conduit_bucket_entries \
             (qualifier, bucket, record_ref, partition_key, record_key, mode, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &qualifier.as_str(),
                &current,
                &entry.record_ref,
                &entry.partition_key,
                &entry.record_key,
                &entry.mode.as_str(),
                &entry.payload,
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(current as u32)
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    async fn store_audit_copy(
        &self,
        sink_id: SinkId,
        destination: &DestinationId,
        record: &serde_json::Value,
    ) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO conduit_audit (sink_id, destination_id, record, stored_at) \
                 VALUES ($1, $2, $3, now())",
                &[&sink_id.value(), &destination.as_str(), record],
            )
            .await?;
        Ok(())
    }
}
