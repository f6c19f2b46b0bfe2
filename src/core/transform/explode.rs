//! One-to-many transformer
//!
//! `explode:lines` turns `{"id": 1, "lines": [a, b]}` into two records,
//! `{"id": 1, "lines": a}` and `{"id": 1, "lines": b}`.

use super::PreOutputTransformer;
use crate::domain::{ConduitError, Result};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ExplodeTransformer {
    field: String,
}

impl ExplodeTransformer {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl PreOutputTransformer for ExplodeTransformer {
    fn transform_data(&mut self, record: Value) -> Result<Vec<Value>> {
        let Value::Object(mut map) = record else {
            return Err(ConduitError::Transformation(
                "explode expects an object record".to_string(),
            ));
        };

        match map.remove(&self.field) {
            // An empty array yields no output records
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .map(|item| {
                    let mut out = map.clone();
                    out.insert(self.field.clone(), item);
                    Value::Object(out)
                })
                .collect()),
            Some(other) => {
                map.insert(self.field.clone(), other);
                Ok(vec![Value::Object(map)])
            }
            None => Ok(vec![Value::Object(map)]),
        }
    }
}
