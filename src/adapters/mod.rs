//! External system integrations for Conduit.
//!
//! This module provides adapters for everything the export and delivery
//! pipelines talk to:
//!
//! - [`format`] - record serializers (CSV, JSON Lines)
//! - [`output`] - export targets (local files, in-memory buffers)
//! - [`broker`] - durable per-topic message logs
//! - [`sender`] - delivery transports (HTTP webhook, log)
//! - [`persistence`] - sink, bucket and audit storage (memory, PostgreSQL)
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern**: the core only sees traits
//! ([`format::FormatGenerator`], [`output::OutputResource`],
//! [`broker::Broker`], [`sender::Sender`], the persistence traits), and the
//! concrete implementations are chosen by name through registries or by
//! configuration through factories.
//!
//! ```rust,no_run
//! use conduit::adapters::broker;
//! use conduit::adapters::output::OutputRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = broker::connect("file:///var/lib/conduit/broker").await?;
//! let outputs = OutputRegistry::with_defaults();
//! let file = outputs.create("file")?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod format;
pub mod output;
pub mod persistence;
pub mod sender;
