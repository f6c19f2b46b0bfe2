//! Persistence factory
//!
//! Builds the stores named by `[persistence]` in the configuration.

use super::memory::MemoryStore;
use super::postgresql::PostgresStore;
use super::traits::{AuditStore, BucketStore, SinkStore};
use crate::config::{ConduitConfig, PersistenceBackend};
use crate::domain::{ConduitError, Result};
use std::sync::Arc;

/// The three store roles, usually backed by one object
#[derive(Clone)]
pub struct Stores {
    pub sinks: Arc<dyn SinkStore>,
    pub buckets: Arc<dyn BucketStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    /// Uses one object for every role
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SinkStore + BucketStore + AuditStore + 'static,
    {
        Self {
            sinks: store.clone(),
            buckets: store.clone(),
            audit: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Creates the stores for the configured backend
///
/// # Errors
///
/// Returns a configuration error when the PostgreSQL backend is selected
/// without a `[persistence.postgresql]` section, or when the pool cannot be
/// built.
pub async fn create_stores(config: &ConduitConfig) -> Result<Stores> {
    match config.persistence.backend {
        PersistenceBackend::Memory => {
            tracing::info!("Using in-memory persistence");
            Ok(Stores::shared(Arc::new(MemoryStore::new())))
        }
        PersistenceBackend::PostgreSQL => {
            let pg_config = config.persistence.postgresql.as_ref().ok_or_else(|| {
                ConduitError::Configuration(
                    "persistence.backend is 'postgresql' but [persistence.postgresql] is missing"
                        .to_string(),
                )
            })?;

            tracing::info!("Creating PostgreSQL persistence");
            let store = PostgresStore::new(pg_config)?;
            store.test_connection().await?;
            Ok(Stores::shared(Arc::new(store)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DestinationId, SinkRecord};

    #[tokio::test]
    async fn test_memory_backend_shares_state() {
        let config = ConduitConfig::default();
        let stores = create_stores(&config).await.unwrap();

        let id = stores.sinks.new_sink_key().await.unwrap();
        let sink = SinkRecord::new(id, DestinationId::new("d").unwrap(), "n");
        stores.sinks.store_new_sink(&sink).await.unwrap();
        assert!(stores.sinks.get_data_sink(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_postgresql_backend_requires_section() {
        let mut config = ConduitConfig::default();
        config.persistence.backend = PersistenceBackend::PostgreSQL;
        let err = create_stores(&config).await.err().unwrap();
        assert!(err.is_configuration());
    }
}
