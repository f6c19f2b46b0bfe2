//! Export sessions
//!
//! - [`session`] - the [`ExportSession`] state machine and its shared [`ExportContext`]
//! - [`params`] - per-export parameters
//! - [`naming`] - target name expansion and part numbering
//! - [`chunk`] - chunk arithmetic for callers that load records in pages

pub mod chunk;
pub mod naming;
pub mod params;
pub mod session;

pub use chunk::{chunk_count, chunked};
pub use naming::PartNamer;
pub use params::ExportParams;
pub use session::{ExportContext, ExportSession, SessionState};
