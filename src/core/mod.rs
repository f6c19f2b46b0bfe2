//! Core pipelines of Conduit.
//!
//! # Modules
//!
//! - [`export`] - Export sessions: format negotiation, streaming and sink bookkeeping
//! - [`bucket`] - Rotating bucket exports with crash-safe in-progress marking
//! - [`delivery`] - Durable, ordered asynchronous delivery queues
//! - [`transform`] - Pre-output transformers and foldable field selection
//!
//! # Export Workflow
//!
//! 1. **Open**: resolve the destination, negotiate format and encoding,
//!    allocate a sink key
//! 2. **Store**: transform each record and hand it to the format generator,
//!    optionally auditing and mirroring it to a delivery queue
//! 3. **Close**: finish the output, then persist the sink record even when
//!    the output failed
//!
//! # Example
//!
//! ```rust,no_run
//! use conduit::adapters::persistence::create_stores;
//! use conduit::config::load_config;
//! use conduit::core::export::{ExportContext, ExportParams, ExportSession};
//! use conduit::domain::DestinationId;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("conduit.toml")?;
//! let stores = create_stores(&config).await?;
//! let ctx = Arc::new(ExportContext::from_config(&config, &stores, None)?);
//!
//! let mut session = ExportSession::new(ctx);
//! session
//!     .open(ExportParams::new(DestinationId::new("invoices")?))
//!     .await?;
//! session
//!     .store(None, "eu", "inv-1", serde_json::json!({"id": 1}))
//!     .await?;
//! let sink = session.close().await?;
//! println!("{sink:?}");
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod delivery;
pub mod export;
pub mod transform;
