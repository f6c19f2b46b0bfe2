//! Pre-output transformation
//!
//! A [`PreOutputTransformer`] sits between `ExportSession::store` and the
//! format generator. It may expand one input record into any number of
//! output records, and may contribute header and footer records.
//!
//! Built-in transformers, selected by the destination's `transformer` key:
//!
//! - `identity` - passes records through (the default)
//! - `flatten` - nested objects become `parent_child` keys
//! - `explode:<field>` - one output record per element of an array field
//! - `trailer` - identity plus a trailing record-count record

pub mod explode;
pub mod flatten;
pub mod foldable;

pub use explode::ExplodeTransformer;
pub use flatten::FlattenTransformer;
pub use foldable::{EnumMode, FoldableParams, GridConfigSource, StaticGridSource};

use crate::domain::{ConduitError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Counters handed to [`PreOutputTransformer::footer_data`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub source_count: u64,
    pub mapped_count: u64,
}

/// Record transformation applied before serialization
pub trait PreOutputTransformer: Send {
    /// Records written right after the output is opened
    fn header_data(&mut self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    /// Maps one input record to zero or more output records
    ///
    /// # Errors
    ///
    /// A [`ConduitError::Transformation`] skips the record.
    fn transform_data(&mut self, record: Value) -> Result<Vec<Value>>;

    /// Records written before the output is closed
    fn footer_data(&mut self, _stats: TransformStats) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    /// Field selection preferred by this transformer
    fn foldable_params(&self) -> Option<FoldableParams> {
        None
    }
}

/// Passes every record through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransformer;

impl PreOutputTransformer for IdentityTransformer {
    fn transform_data(&mut self, record: Value) -> Result<Vec<Value>> {
        Ok(vec![record])
    }
}

/// Identity plus a trailing `{"_trailer": true, ...}` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TrailerTransformer;

impl PreOutputTransformer for TrailerTransformer {
    fn transform_data(&mut self, record: Value) -> Result<Vec<Value>> {
        Ok(vec![record])
    }

    fn footer_data(&mut self, stats: TransformStats) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "_trailer": true,
            "source_count": stats.source_count,
            "record_count": stats.mapped_count,
        })])
    }
}

type TransformerFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Box<dyn PreOutputTransformer>> + Send + Sync>;

/// Map-based transformer factory
///
/// Keys may carry an argument after a colon, e.g. `explode:lines`.
#[derive(Clone)]
pub struct TransformerRegistry {
    factories: HashMap<String, TransformerFactory>,
}

impl TransformerRegistry {
    /// Registry without any transformer; `identity` is still implied
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in transformers
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("identity", |_| Ok(Box::new(IdentityTransformer)));
        registry.register("trailer", |_| Ok(Box::new(TrailerTransformer)));
        registry.register("flatten", |arg| {
            Ok(Box::new(FlattenTransformer::new(arg.unwrap_or("_"))))
        });
        registry.register("explode", |arg| match arg {
            Some(field) if !field.is_empty() => Ok(Box::new(ExplodeTransformer::new(field))),
            _ => Err(ConduitError::Configuration(
                "explode transformer needs a field, e.g. 'explode:lines'".to_string(),
            )),
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Option<&str>) -> Result<Box<dyn PreOutputTransformer>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Instantiates the transformer for `key`; `None` yields the identity
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown keys.
    pub fn create(&self, key: Option<&str>) -> Result<Box<dyn PreOutputTransformer>> {
        let Some(key) = key else {
            return Ok(Box::new(IdentityTransformer));
        };
        let (name, arg) = match key.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (key, None),
        };
        match self.factories.get(name) {
            Some(factory) => factory(arg),
            None if name == "identity" => Ok(Box::new(IdentityTransformer)),
            None => Err(ConduitError::Configuration(format!(
                "Unknown transformer '{name}'"
            ))),
        }
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
