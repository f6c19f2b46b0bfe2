//! Message senders
//!
//! A [`Sender`] pushes one [`InMemoryMessage`] to its receiver and reports
//! the [`DeliveryOutcome`]. Each queue worker owns exactly one sender, created
//! through the [`SenderRegistry`] from the queue's `sender` setting.
//!
//! A sender distinguishes two kinds of failure:
//!
//! - the receiver answered: the answer is mapped to an outcome by
//!   [`Sender::outcome_for_status`] and returned in a [`DeliveryReport`]
//! - the receiver could not be reached: `send` returns an error and the
//!   worker retries the message after backoff

pub mod http;
pub mod log;

pub use http::HttpSender;
pub use log::LogSender;

use crate::config::{AsyncChannel, QueueSettings};
use crate::domain::{ConduitError, DeliveryOutcome, DeliveryReport, InMemoryMessage, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Transport for one delivery queue
#[async_trait]
pub trait Sender: Send {
    /// Prepares the sender for the queue it will serve
    async fn init(&mut self, settings: &QueueSettings) -> Result<()>;

    /// Sends one message
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Delivery`] when the receiver could not be reached.
    async fn send(
        &mut self,
        channel: &AsyncChannel,
        timeout: Duration,
        message: &InMemoryMessage,
        started_at: DateTime<Utc>,
    ) -> Result<DeliveryReport>;

    /// Maps a receiver status code to an outcome
    ///
    /// 2xx is delivered; 408, 429 and 5xx are retried; everything else is
    /// rejected.
    fn outcome_for_status(&self, status: u16) -> DeliveryOutcome {
        match status {
            200..=299 => DeliveryOutcome::Delivered,
            408 | 429 | 500..=599 => DeliveryOutcome::Retry,
            _ => DeliveryOutcome::Rejected,
        }
    }

    /// Releases transport resources
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

type SenderFactory = Arc<dyn Fn() -> Box<dyn Sender> + Send + Sync>;

/// Named sender factories
#[derive(Clone)]
pub struct SenderRegistry {
    factories: HashMap<String, SenderFactory>,
}

impl SenderRegistry {
    /// Registry with `http` and `log`
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("http", || Box::new(HttpSender::new()));
        registry.register("log", || Box::new(LogSender::new()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Sender> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Sender>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConduitError::Configuration(format!("Unknown sender '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("SenderRegistry").field("senders", &names).finish()
    }
}

/// Elapsed milliseconds since `started_at`, never negative
pub(crate) fn elapsed_ms(started_at: DateTime<Utc>) -> u64 {
    (Utc::now() - started_at).num_milliseconds().max(0) as u64
}
