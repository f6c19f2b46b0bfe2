//! Foldable output parameters
//!
//! Runtime directives selecting the visible fields of an export, their
//! header labels, and how enumerated values are rendered.

use crate::config::GridConfig;
use crate::domain::{ConduitError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Rendering of enumerated values shaped like `{"code": .., "label": ..}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnumMode {
    /// Emit the code only
    #[default]
    Code,
    /// Emit the label only
    Label,
    /// Emit `"code - label"`
    Both,
    /// Leave the object untouched
    Raw,
}

impl FromStr for EnumMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code" => Ok(EnumMode::Code),
            "label" => Ok(EnumMode::Label),
            "both" => Ok(EnumMode::Both),
            "raw" => Ok(EnumMode::Raw),
            other => Err(format!(
                "Invalid enum mode '{other}'. Expected code, label, both or raw"
            )),
        }
    }
}

/// Field selection and rendering for one export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FoldableParams {
    /// Visible fields in output order; `None` exports every field
    #[serde(default)]
    pub fields: Option<Vec<String>>,

    /// Header label per field, the field name is used when absent
    #[serde(default)]
    pub header_labels: HashMap<String, String>,

    #[serde(default)]
    pub enum_mode: EnumMode,
}

impl FoldableParams {
    /// Every field, code rendering
    pub fn all_fields() -> Self {
        Self::default()
    }

    /// Explicit field selection
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.header_labels.insert(field.into(), label.into());
        self
    }

    pub fn with_enum_mode(mut self, mode: EnumMode) -> Self {
        self.enum_mode = mode;
        self
    }

    pub fn label_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.header_labels
            .get(field)
            .map(String::as_str)
            .unwrap_or(field)
    }

    /// Applies the enum mode to a single value
    pub fn render_value(&self, value: &Value) -> Value {
        let Value::Object(map) = value else {
            return value.clone();
        };
        let (Some(code), Some(label)) = (map.get("code"), map.get("label")) else {
            return value.clone();
        };
        if map.len() != 2 {
            return value.clone();
        }

        match self.enum_mode {
            EnumMode::Code => code.clone(),
            EnumMode::Label => label.clone(),
            EnumMode::Both => Value::String(format!(
                "{} - {}",
                scalar_text(code),
                scalar_text(label)
            )),
            EnumMode::Raw => value.clone(),
        }
    }

    /// Projects a record onto the visible fields, rendering enums
    ///
    /// Non-object records pass through unchanged.
    pub fn project(&self, record: &Value) -> Value {
        let Value::Object(map) = record else {
            return record.clone();
        };

        let mut out = serde_json::Map::new();
        match &self.fields {
            Some(fields) => {
                for field in fields {
                    let value = map.get(field).unwrap_or(&Value::Null);
                    out.insert(field.clone(), self.render_value(value));
                }
            }
            None => {
                for (key, value) in map {
                    out.insert(key.clone(), self.render_value(value));
                }
            }
        }
        Value::Object(out)
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Source of per-grid foldable parameters (saved column layouts)
#[async_trait]
pub trait GridConfigSource: Send + Sync {
    /// Parameters for a grid, `None` when the grid is unknown
    async fn foldable_params(&self, grid_id: &str) -> Result<Option<FoldableParams>>;
}

/// Grid layouts held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticGridSource {
    grids: HashMap<String, FoldableParams>,
}

impl StaticGridSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grid(mut self, grid_id: impl Into<String>, params: FoldableParams) -> Self {
        self.grids.insert(grid_id.into(), params);
        self
    }

    /// Layouts from the `[[grids]]` configuration section
    pub fn from_config(grids: &[GridConfig]) -> Result<Self> {
        let mut source = Self::new();
        for grid in grids {
            let mut params = if grid.fields.is_empty() {
                FoldableParams::all_fields()
            } else {
                FoldableParams::with_fields(grid.fields.iter().cloned())
            };
            params.header_labels = grid.labels.clone();
            if let Some(mode) = &grid.enum_mode {
                params.enum_mode = mode.parse().map_err(ConduitError::Configuration)?;
            }
            source = source.with_grid(grid.id.clone(), params);
        }
        Ok(source)
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

#[async_trait]
impl GridConfigSource for StaticGridSource {
    async fn foldable_params(&self, grid_id: &str) -> Result<Option<FoldableParams>> {
        Ok(self.grids.get(grid_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_enum_modes() {
        let value = json!({"code": "P", "label": "Paid"});
        let params = FoldableParams::all_fields();
        assert_eq!(params.render_value(&value), json!("P"));

        let params = params.with_enum_mode(EnumMode::Label);
        assert_eq!(params.render_value(&value), json!("Paid"));

        let params = FoldableParams::all_fields().with_enum_mode(EnumMode::Both);
        assert_eq!(params.render_value(&value), json!("P - Paid"));

        let params = FoldableParams::all_fields().with_enum_mode(EnumMode::Raw);
        assert_eq!(params.render_value(&value), value);
    }

    #[test]
    fn test_render_leaves_other_objects_alone() {
        let value = json!({"code": "P", "label": "Paid", "extra": 1});
        assert_eq!(FoldableParams::all_fields().render_value(&value), value);
        assert_eq!(FoldableParams::all_fields().render_value(&json!(5)), json!(5));
    }

    #[test]
    fn test_project_selected_fields() {
        let params = FoldableParams::with_fields(["id", "status", "missing"]);
        let record = json!({"id": 1, "status": {"code": "O", "label": "Open"}, "secret": "x"});
        let projected = params.project(&record);
        assert_eq!(projected, json!({"id": 1, "status": "O", "missing": null}));
    }

    #[test]
    fn test_label_fallback() {
        let params = FoldableParams::with_fields(["id"]).with_label("id", "Invoice #");
        assert_eq!(params.label_for("id"), "Invoice #");
        assert_eq!(params.label_for("amount"), "amount");
    }

    #[tokio::test]
    async fn test_grid_source_from_config() {
        let grids = vec![
            GridConfig {
                id: "compact".to_string(),
                fields: vec!["id".to_string(), "status".to_string()],
                labels: HashMap::from([("id".to_string(), "Invoice #".to_string())]),
                enum_mode: Some("both".to_string()),
            },
            GridConfig {
                id: "everything".to_string(),
                ..GridConfig::default()
            },
        ];
        let source = StaticGridSource::from_config(&grids).unwrap();

        let compact = source.foldable_params("compact").await.unwrap().unwrap();
        assert_eq!(compact.fields, Some(vec!["id".to_string(), "status".to_string()]));
        assert_eq!(compact.label_for("id"), "Invoice #");
        assert_eq!(compact.enum_mode, EnumMode::Both);

        let everything = source.foldable_params("everything").await.unwrap().unwrap();
        assert_eq!(everything, FoldableParams::all_fields());

        let bad = vec![GridConfig {
            id: "bad".to_string(),
            enum_mode: Some("loud".to_string()),
            ..GridConfig::default()
        }];
        assert!(StaticGridSource::from_config(&bad).unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_static_grid_source() {
        let source =
            StaticGridSource::new().with_grid("grid-1", FoldableParams::with_fields(["a"]));
        let params = source.foldable_params("grid-1").await.unwrap().unwrap();
        assert_eq!(params.fields, Some(vec!["a".to_string()]));
        assert!(source.foldable_params("grid-2").await.unwrap().is_none());
    }
}
