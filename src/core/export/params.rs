//! Export request parameters

use crate::core::transform::{EnumMode, FoldableParams};
use crate::domain::DestinationId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a caller asks of one export
///
/// Everything except the destination is optional and falls back to the
/// destination configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportParams {
    pub destination_id: DestinationId,

    /// Requested format, must agree with the configured one when both are set
    #[serde(default)]
    pub format: Option<String>,

    /// Character encoding label (`UTF-8`, `US-ASCII`, `ISO-8859-1`)
    #[serde(default)]
    pub encoding: Option<String>,

    /// Grid whose field selection should be used
    #[serde(default)]
    pub grid_id: Option<String>,

    /// Explicit field selection
    #[serde(default)]
    pub fields: Option<Vec<String>>,

    #[serde(default)]
    pub header_labels: HashMap<String, String>,

    #[serde(default)]
    pub enum_mode: Option<EnumMode>,
}

impl ExportParams {
    pub fn new(destination_id: DestinationId) -> Self {
        Self {
            destination_id,
            format: None,
            encoding: None,
            grid_id: None,
            fields: None,
            header_labels: HashMap::new(),
            enum_mode: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_grid(mut self, grid_id: impl Into<String>) -> Self {
        self.grid_id = Some(grid_id.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Foldable parameters built from the explicit selection, if any
    ///
    /// Without explicit fields every field is exported, still honoring the
    /// requested labels and enum mode.
    pub(crate) fn explicit_foldable(&self) -> FoldableParams {
        FoldableParams {
            fields: self.fields.clone(),
            header_labels: self.header_labels.clone(),
            enum_mode: self.enum_mode.unwrap_or_default(),
        }
    }
}
