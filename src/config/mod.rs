//! Configuration management for Conduit.
//!
//! Conduit reads a single TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `CONDUIT_<SECTION>_<KEY>` overrides
//! - Default values for optional settings
//! - Validation of cross references (destinations, queues, channels)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use conduit::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("conduit.toml")?;
//! for destination in &config.destinations {
//!     println!("{} -> {}", destination.id, destination.name_pattern);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//! tenant_id = "acme"
//!
//! [persistence]
//! backend = "postgresql"
//!
//! [persistence.postgresql]
//! connection_string = "${CONDUIT_PG_URL}"
//!
//! [[destinations]]
//! id = "invoices"
//! format = "csv"
//! directory = "/srv/exports"
//! name_pattern = "{destination}_{date}_{sink_id}.{ext}"
//! relay_channel = "invoices-relay"
//!
//! [[bucket.qualifiers]]
//! qualifier = "INVOICES"
//! destination = "invoices"
//! max_buckets = 4
//!
//! [delivery.defaults]
//! broker_address = "file:///var/lib/conduit/broker"
//! topic_prefix = "conduit."
//!
//! [[delivery.queues]]
//! id = "invoices"
//! endpoint = "https://erp.example.com/api/invoices"
//! bearer_token = "${CONDUIT_ERP_TOKEN}"
//!
//! [[delivery.channels]]
//! id = "invoices-relay"
//! queue = "invoices"
//! idempotency_header = "Idempotency-Key"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, AsyncChannel, BucketConfig, BucketQualifierConfig, ConduitConfig,
    DeliveryConfig, DeliveryDefaults, DestinationConfig, ExecutionPolicy, GridConfig, LoggingConfig,
    PersistenceBackend, PersistenceConfig, PostgreSQLConfig, QueueConfig, QueueSettings,
    RelayRoute, MAX_CHUNK_SIZE,
};
pub use secret::{secret_string, SecretString, SecretValue};
