//! JSON Lines generator

use super::{Encoding, FormatGenerator, GeneratorContext, RecordRow};
use crate::adapters::output::OutputResource;
use crate::core::transform::FoldableParams;
use crate::domain::Result;
use async_trait::async_trait;

/// One JSON document per line
#[derive(Debug, Default)]
pub struct JsonLinesGenerator {
    foldable: FoldableParams,
    encoding: Encoding,
    written: u64,
}

impl JsonLinesGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FormatGenerator for JsonLinesGenerator {
    fn extension(&self) -> &'static str {
        "jsonl"
    }

    async fn open(
        &mut self,
        ctx: &GeneratorContext,
        _output: &mut dyn OutputResource,
    ) -> Result<()> {
        self.foldable = ctx.foldable.clone();
        self.encoding = ctx.encoding;
        self.written = 0;
        Ok(())
    }

    async fn generate_data(
        &mut self,
        output: &mut dyn OutputResource,
        row: RecordRow<'_>,
    ) -> Result<()> {
        let projected = self.foldable.project(row.record);
        let mut line = serde_json::to_string(&projected)?;
        line.push('\n');
        let bytes = self.encoding.encode(&line)?;
        output.write(&bytes, row.partition_key, row.record_key).await?;
        self.written += 1;
        Ok(())
    }

    async fn close(&mut self, _output: &mut dyn OutputResource) -> Result<()> {
        tracing::debug!(documents = self.written, "Closed JSONL part");
        Ok(())
    }
}
