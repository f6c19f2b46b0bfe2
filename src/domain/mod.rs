//! Domain models and types for Conduit.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`SinkId`], [`DestinationId`], [`ChannelId`],
//!   [`QueueId`], [`Qualifier`])
//! - **Export bookkeeping** ([`SinkRecord`], [`TransferStatus`], [`ExportResponse`])
//! - **Bucket state** ([`BucketCounter`], [`BucketEntry`])
//! - **Delivery envelopes** ([`InMemoryMessage`], [`DeliveryReport`])
//! - **Error types** ([`ConduitError`]) and the [`Result`] alias
//!
//! Identifiers are newtypes so a channel name cannot be passed where a queue
//! name is expected:
//!
//! ```rust
//! use conduit::domain::{ChannelId, QueueId};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = ChannelId::new("orders")?;
//! let queue = QueueId::new("orders-queue")?;
//! // let wrong: QueueId = channel;  // Compile error!
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod context;
pub mod errors;
pub mod ids;
pub mod message;
pub mod response;
pub mod result;
pub mod sink;

pub use bucket::{BucketCounter, BucketEntry, EntryMode};
pub use errors::ConduitError;
pub use ids::{ChannelId, DestinationId, QueueId, Qualifier, SinkId};
pub use message::{DeliveryOutcome, DeliveryReport, InMemoryMessage};
pub use response::{ExportResponse, ResponseCode};
pub use result::Result;
pub use sink::{SinkRecord, TransferStatus};
