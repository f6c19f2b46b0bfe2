//! Rotating bucket exports
//!
//! [`BucketExportCoordinator`] owns the rotate, export and clear cycle for
//! every configured qualifier. [`WriteFence`] keeps entries that are being
//! appended during a rotation from being missed by the export.

pub mod coordinator;
pub mod fence;

pub use coordinator::{BucketExportCoordinator, BucketExportRequest, ENTRY_MODE_FIELD};
pub use fence::WriteFence;
