// Conduit - Export Sessions and Asynchronous Delivery
// Copyright (c) 2025 Conduit Contributors
// Licensed under the MIT License

//! # Conduit - export sessions and asynchronous delivery
//!
//! Conduit writes structured records to external destinations through export
//! sessions, flushes rotating record buckets, and relays records to
//! downstream systems through durable, ordered per-queue delivery.
//!
//! ## Overview
//!
//! - **Export sessions** negotiate format and encoding, stream records through
//!   a transformer and a format generator, split output into parts and
//!   persist a sink record for every export, even when the output fails
//! - **Bucket exports** rotate a ring of buckets per qualifier and export the
//!   vacated bucket, re-exporting it in full after a crash
//! - **Delivery queues** append messages to a broker topic and forward them
//!   in order to a sender, with pause, resume and bounded drain on shutdown
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Export sessions, bucket exports, delivery queues, transformers
//! - [`adapters`] - Formats, outputs, brokers, senders and persistence
//! - [`domain`] - Identifiers, records, responses and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit::adapters::persistence::create_stores;
//! use conduit::config::load_config;
//! use conduit::core::bucket::{BucketExportCoordinator, BucketExportRequest};
//! use conduit::core::export::ExportContext;
//! use conduit::domain::Qualifier;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("conduit.toml")?;
//!     let stores = create_stores(&config).await?;
//!     let exports = Arc::new(ExportContext::from_config(&config, &stores, None)?);
//!     let coordinator = BucketExportCoordinator::from_config(&config, &stores, exports);
//!
//!     let response = coordinator
//!         .export_bucket(BucketExportRequest::new(Qualifier::new("INVOICES")?))
//!         .await;
//!     println!("{}: {}", response.code, response.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`domain::Result`], backed by
//! [`domain::ConduitError`]. Bucket exports turn errors into an
//! [`domain::ExportResponse`] with a numeric code instead.
//!
//! ## Logging
//!
//! Every module logs through `tracing` with structured fields:
//!
//! ```rust,no_run
//! tracing::info!(queue = "orders", pending = 3, "Queue status");
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
