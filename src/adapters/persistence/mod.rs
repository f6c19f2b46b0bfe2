//! Persistence backends
//!
//! - [`traits`] - the [`SinkStore`], [`BucketStore`] and [`AuditStore`] seams
//! - [`memory`] - [`MemoryStore`], process-local
//! - [`postgresql`] - [`PostgresStore`], pooled with deadpool
//! - [`factory`] - [`create_stores`] from configuration

pub mod factory;
pub mod memory;
pub mod postgresql;
pub mod traits;

pub use factory::{create_stores, Stores};
pub use memory::{AuditCopy, MemoryStore};
pub use postgresql::PostgresStore;
pub use traits::{AuditStore, BucketStore, SinkStore};
