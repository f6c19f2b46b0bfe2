//! Logging and observability
//!
//! Structured logging through `tracing`, plus a few macros that keep the
//! field names of recurring events consistent across modules.
//!
//! # Example
//!
//! ```no_run
//! use conduit::logging::init_logging;
//! use conduit::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(queue = "orders", "Queue opened");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of an export session
///
/// # Example
///
/// ```no_run
/// use conduit::log_export_start;
/// use conduit::domain::{DestinationId, SinkId};
///
/// let destination = DestinationId::new("invoices").unwrap();
/// log_export_start!(&destination, SinkId::new(1), "invoices_1.csv");
/// ```
#[macro_export]
macro_rules! log_export_start {
    ($destination:expr, $sink_id:expr, $name:expr) => {
        tracing::info!(
            destination = %$destination,
            sink_id = %$sink_id,
            target = %$name,
            "Starting export"
        );
    };
}

/// Log the completion of an export session
///
/// # Example
///
/// ```no_run
/// use conduit::log_export_complete;
/// use conduit::domain::SinkId;
/// use std::time::Duration;
///
/// log_export_complete!(SinkId::new(1), 42u64, Duration::from_secs(3));
/// ```
#[macro_export]
macro_rules! log_export_complete {
    ($sink_id:expr, $count:expr, $duration:expr) => {
        tracing::info!(
            sink_id = %$sink_id,
            count = $count,
            duration_ms = $duration.as_millis() as u64,
            "Export completed"
        );
    };
}

/// Log a failed delivery attempt before backing off
///
/// # Example
///
/// ```no_run
/// use conduit::log_delivery_failure;
/// use std::time::Duration;
///
/// log_delivery_failure!("orders", "abc123", "connection refused", Duration::from_secs(5));
/// ```
#[macro_export]
macro_rules! log_delivery_failure {
    ($queue:expr, $message_id:expr, $reason:expr, $backoff:expr) => {
        tracing::warn!(
            queue = %$queue,
            message_id = %$message_id,
            reason = %$reason,
            backoff_ms = $backoff.as_millis() as u64,
            "Delivery failed, backing off"
        );
    };
}
