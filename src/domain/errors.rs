//! Domain error types
//!
//! This module defines the error hierarchy for Conduit. All errors are
//! domain-specific and don't expose third-party types to callers.

use thiserror::Error;

/// Main Conduit error type
///
/// This is the primary error type used throughout the library. The variants
/// follow the error taxonomy of the export pipeline: configuration problems
/// fail fast, record-level problems are skippable, destination problems are
/// re-raised after bookkeeping.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Neither the export parameters nor the destination define a format
    #[error("Configuration error: format unspecified for destination '{0}'")]
    FormatUnspecified(String),

    /// The requested format contradicts the configured one
    #[error("Configuration error: requested format '{requested}' does not match configured format '{configured}'")]
    FormatMismatch {
        requested: String,
        configured: String,
    },

    /// An export with the same target name already exists
    #[error("Duplicate export: '{0}' already exists")]
    DuplicateExport(String),

    /// Operation invoked in the wrong session state
    #[error("Sequencing error: {0}")]
    Sequencing(String),

    /// A single record could not be transformed or serialized
    #[error("Transformation error: {0}")]
    Transformation(String),

    /// Output destination failures (open, write, close)
    #[error("Destination error: {0}")]
    Destination(String),

    /// Operation not supported by the destination
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Bucket rotation and bucket export errors
    #[error("Bucket error: {0}")]
    Bucket(String),

    /// Persistence layer errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Asynchronous delivery errors (broker, sender)
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl ConduitError {
    /// Whether this error only affects a single record
    ///
    /// Record-level errors are logged and the record is skipped; every other
    /// error aborts the surrounding operation.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            ConduitError::Transformation(_) | ConduitError::Serialization(_)
        )
    }

    /// Whether this error is a configuration error that must not be retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConduitError::Configuration(_)
                | ConduitError::FormatUnspecified(_)
                | ConduitError::FormatMismatch { .. }
        )
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for ConduitError {
    fn from(err: std::io::Error) -> Self {
        ConduitError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for ConduitError {
    fn from(err: serde_json::Error) -> Self {
        ConduitError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for ConduitError {
    fn from(err: toml::de::Error) -> Self {
        ConduitError::Configuration(format!("TOML parse error: {err}"))
    }
}

impl From<tokio_postgres::Error> for ConduitError {
    fn from(err: tokio_postgres::Error) -> Self {
        ConduitError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for ConduitError {
    fn from(err: reqwest::Error) -> Self {
        ConduitError::Delivery(err.to_string())
    }
}
