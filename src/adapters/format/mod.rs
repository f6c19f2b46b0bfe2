//! Format generators
//!
//! A [`FormatGenerator`] serializes one logical record at a time into an
//! [`OutputResource`]. Generators are created per export part through the
//! [`FormatRegistry`], keyed by format name.

pub mod csv;
pub mod encoding;
pub mod jsonl;

pub use csv::CsvGenerator;
pub use encoding::Encoding;
pub use jsonl::JsonLinesGenerator;

use crate::adapters::output::OutputResource;
use crate::core::transform::FoldableParams;
use crate::domain::{ConduitError, DestinationId, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Settings a generator is opened with
#[derive(Debug, Clone)]
pub struct GeneratorContext {
    pub destination_id: DestinationId,
    pub format: String,
    pub foldable: FoldableParams,
    pub encoding: Encoding,
}

/// One record handed to [`FormatGenerator::generate_data`]
#[derive(Debug, Clone, Copy)]
pub struct RecordRow<'a> {
    /// Position of the input record in the export
    pub source_seq: u64,
    /// Position of the output record in the export
    pub mapped_seq: u64,
    pub record_ref: Option<&'a str>,
    pub partition_key: &'a str,
    pub record_key: &'a str,
    pub record: &'a Value,
}

/// Serializer for one output format
#[async_trait]
pub trait FormatGenerator: Send {
    /// File extension without the dot
    fn extension(&self) -> &'static str;

    /// Prepares a new part, writing any preamble
    async fn open(&mut self, ctx: &GeneratorContext, output: &mut dyn OutputResource)
        -> Result<()>;

    /// Serializes one record
    ///
    /// # Errors
    ///
    /// Record-level problems are reported as [`ConduitError::Transformation`]
    /// or [`ConduitError::Serialization`]; anything else aborts the export.
    async fn generate_data(
        &mut self,
        output: &mut dyn OutputResource,
        row: RecordRow<'_>,
    ) -> Result<()>;

    /// Writes any trailer of the current part
    async fn close(&mut self, output: &mut dyn OutputResource) -> Result<()>;
}

type GeneratorFactory = Arc<dyn Fn() -> Box<dyn FormatGenerator> + Send + Sync>;

/// Map-based generator factory
#[derive(Clone)]
pub struct FormatRegistry {
    factories: HashMap<String, GeneratorFactory>,
}

impl FormatRegistry {
    /// Registry with `csv` and `jsonl`
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("csv", || Box::new(CsvGenerator::new()));
        registry.register("jsonl", || Box::new(JsonLinesGenerator::new()));
        registry
    }

    pub fn register<F>(&mut self, format: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn FormatGenerator> + Send + Sync + 'static,
    {
        self.factories
            .insert(format.into().to_lowercase(), Arc::new(factory));
    }

    /// Instantiates a generator for `format` (case-insensitive)
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown formats.
    pub fn create(&self, format: &str) -> Result<Box<dyn FormatGenerator>> {
        self.factories
            .get(&format.to_lowercase())
            .map(|factory| factory())
            .ok_or_else(|| ConduitError::Configuration(format!("Unknown format '{format}'")))
    }

    pub fn formats(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Textual form of a scalar for row-oriented formats
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_case_insensitive() {
        let registry = FormatRegistry::with_defaults();
        assert!(registry.create("CSV").is_ok());
        assert_eq!(registry.create("jsonl").unwrap().extension(), "jsonl");
        assert!(registry.create("xml").is_err());
        assert_eq!(registry.formats(), vec!["csv".to_string(), "jsonl".to_string()]);
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&Value::Null), "");
        assert_eq!(value_text(&json!("x")), "x");
        assert_eq!(value_text(&json!(1.5)), "1.5");
        assert_eq!(value_text(&json!([1, 2])), "[1,2]");
    }
}
