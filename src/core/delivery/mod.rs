//! Asynchronous delivery
//!
//! Producers hand payloads to [`DeliveryService::send_async`], which appends
//! them to the broker topic of the channel's queue. Each open queue runs one
//! worker that forwards messages in topic order to the queue's sender and
//! reports every outcome to a [`DeliveryListener`].
//!
//! ```rust,no_run
//! use conduit::config::load_config;
//! use conduit::core::delivery::{DeliveryService, LoggingListener};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("conduit.toml")?;
//! let service = DeliveryService::from_config(&config, Arc::new(LoggingListener));
//! service.start(&config.delivery.queues).await?;
//! // ...
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod gate;
pub mod listener;
pub mod queue;
pub mod service;

pub use channel::ChannelDirectory;
pub use gate::{Gate, SharedGate};
pub use listener::{DeliveryListener, ListenerChain, LoggingListener, SinkStatusListener};
pub use queue::QueueHandle;
pub use service::{DeliveryService, QueueStatus};
