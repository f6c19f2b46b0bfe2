//! Flattening transformer
//!
//! Converts nested objects into flat field names so that row-oriented formats
//! such as CSV can carry them:
//! - `{"customer": {"name": "x"}}` → `{"customer_name": "x"}`
//! - `"ship/to:city|code"` → `"ship_to_city_code"`
//!
//! Arrays are kept as values.

use super::PreOutputTransformer;
use crate::domain::{ConduitError, Result};
use serde_json::{Map, Value};

/// Flattens nested objects into `parent<sep>child` keys
#[derive(Debug, Clone)]
pub struct FlattenTransformer {
    separator: String,
}

impl FlattenTransformer {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl PreOutputTransformer for FlattenTransformer {
    fn transform_data(&mut self, record: Value) -> Result<Vec<Value>> {
        let Value::Object(map) = record else {
            return Err(ConduitError::Transformation(format!(
                "flatten expects an object, got {}",
                kind_of(&record)
            )));
        };

        let mut out = Map::new();
        flatten_into(&mut out, None, map, &self.separator)?;
        Ok(vec![Value::Object(out)])
    }
}

fn flatten_into(
    out: &mut Map<String, Value>,
    prefix: Option<&str>,
    map: Map<String, Value>,
    separator: &str,
) -> Result<()> {
    for (key, value) in map {
        let key = flatten_path(&key, separator);
        let key = match prefix {
            Some(prefix) => format!("{prefix}{separator}{key}"),
            None => key,
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                flatten_into(out, Some(&key), inner, separator)?
            }
            other => {
                if out.insert(key.clone(), other).is_some() {
                    return Err(ConduitError::Transformation(format!(
                        "flattened key '{key}' collides with an existing field"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Replaces path characters (`/`, `:`, `|`) with the separator
fn flatten_path(path: &str, separator: &str) -> String {
    path.replace(['/', ':', '|'], separator)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
