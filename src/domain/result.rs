//! Result type alias for Conduit

use super::errors::ConduitError;

/// Result type alias for Conduit operations
///
/// # Examples
///
/// ```
/// use conduit::domain::result::Result;
/// use conduit::domain::errors::ConduitError;
///
/// fn failing_function() -> Result<()> {
///     Err(ConduitError::Sequencing("session is closed".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, ConduitError>;
