//! Error context extension trait
//!
//! `anyhow::Context` for library code that must keep returning
//! [`ConduitError`].
//!
//! ```rust
//! use conduit::domain::Result;
//! use conduit::domain::context::ResultExt;
//!
//! fn read_payload(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))
//! }
//! ```

use crate::domain::errors::ConduitError;
use crate::domain::result::Result;

/// Adds context to errors while keeping the error variant
pub trait ResultExt<T> {
    /// Prefix the error message with `context`
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Like [`ResultExt::context`], evaluated only on error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ConduitError>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| wrap(e.into(), context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

/// Re-wraps the message in the same variant so callers can still classify it
fn wrap(err: ConduitError, context: impl std::fmt::Display) -> ConduitError {
    use ConduitError::*;
    match err {
        Configuration(m) => Configuration(format!("{context}: {m}")),
        Transformation(m) => Transformation(format!("{context}: {m}")),
        Destination(m) => Destination(format!("{context}: {m}")),
        Unsupported(m) => Unsupported(format!("{context}: {m}")),
        Bucket(m) => Bucket(format!("{context}: {m}")),
        Persistence(m) => Persistence(format!("{context}: {m}")),
        Delivery(m) => Delivery(format!("{context}: {m}")),
        Io(m) => Io(format!("{context}: {m}")),
        Serialization(m) => Serialization(format!("{context}: {m}")),
        other => Other(format!("{context}: {other}")),
    }
}
