//! CSV generator
//!
//! Columns come from the foldable field selection. When every field is
//! exported, the columns are the sorted keys of the first record; fields
//! that only appear in later records are dropped.

use super::{value_text, Encoding, FormatGenerator, GeneratorContext, RecordRow};
use crate::adapters::output::OutputResource;
use crate::core::transform::FoldableParams;
use crate::domain::{ConduitError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Comma-separated values with a header row
#[derive(Debug, Default)]
pub struct CsvGenerator {
    columns: Vec<String>,
    header_written: bool,
    foldable: FoldableParams,
    encoding: Encoding,
    rows: u64,
}

impl CsvGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn write_header(&mut self, output: &mut dyn OutputResource) -> Result<()> {
        let labels: Vec<String> = self
            .columns
            .iter()
            .map(|c| escape_csv_value(self.foldable.label_for(c)))
            .collect();
        let line = format!("{}\n", labels.join(","));
        // An unencodable label affects every row, so it is not record-level
        let bytes = self
            .encoding
            .encode(&line)
            .map_err(|e| ConduitError::Configuration(format!("CSV header: {e}")))?;
        output.write(&bytes, "", "").await?;
        self.header_written = true;
        debug!(columns = self.columns.len(), "Wrote CSV header");
        Ok(())
    }
}

#[async_trait]
impl FormatGenerator for CsvGenerator {
    fn extension(&self) -> &'static str {
        "csv"
    }

    async fn open(
        &mut self,
        ctx: &GeneratorContext,
        output: &mut dyn OutputResource,
    ) -> Result<()> {
        self.foldable = ctx.foldable.clone();
        self.encoding = ctx.encoding;
        self.header_written = false;
        self.rows = 0;
        self.columns = ctx.foldable.fields.clone().unwrap_or_default();

        if !self.columns.is_empty() {
            self.write_header(output).await?;
        }
        Ok(())
    }

    async fn generate_data(
        &mut self,
        output: &mut dyn OutputResource,
        row: RecordRow<'_>,
    ) -> Result<()> {
        let Value::Object(map) = row.record else {
            return Err(ConduitError::Transformation(format!(
                "CSV rows must be objects (record {})",
                row.mapped_seq
            )));
        };

        if !self.header_written {
            self.columns = map.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect();
            self.write_header(output).await?;
        }

        let values: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let value = map.get(column).unwrap_or(&Value::Null);
                escape_csv_value(&value_text(&self.foldable.render_value(value)))
            })
            .collect();
        let line = format!("{}\n", values.join(","));
        let bytes = self.encoding.encode(&line)?;

        output.write(&bytes, row.partition_key, row.record_key).await?;
        self.rows += 1;
        Ok(())
    }

    async fn close(&mut self, _output: &mut dyn OutputResource) -> Result<()> {
        debug!(rows = self.rows, "Closed CSV part");
        Ok(())
    }
}

/// Quotes a value containing a comma, quote or line break
fn escape_csv_value(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
