//! Export command implementation
//!
//! Streams JSON Lines records from a file (or stdin) through one export
//! session.

use super::{completion_exit_code, exit_code_for, Pipeline};
use crate::core::export::{ExportParams, ExportSession};
use crate::domain::{ConduitError, DestinationId};
use clap::Args;
use serde_json::Value;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Destination id from the configuration
    #[arg(short, long)]
    pub destination: String,

    /// JSON Lines input file, `-` for stdin
    #[arg(short, long, default_value = "-")]
    pub input: String,

    /// Requested format; must match the destination's format when both are set
    #[arg(long)]
    pub format: Option<String>,

    /// Character encoding override
    #[arg(long)]
    pub encoding: Option<String>,

    /// Grid from `[[grids]]` whose field selection applies; also fills `{grid_id}`
    #[arg(long)]
    pub grid: Option<String>,

    /// Explicit field selection (comma-separated)
    #[arg(long)]
    pub fields: Option<String>,

    /// Record field used as partition key
    #[arg(long)]
    pub partition_field: Option<String>,

    /// Record field used as record key (defaults to the line number)
    #[arg(long)]
    pub key_field: Option<String>,
}

impl ExportArgs {
    fn params(&self) -> Result<ExportParams, ConduitError> {
        let destination =
            DestinationId::from_str(&self.destination).map_err(ConduitError::Configuration)?;
        let mut params = ExportParams::new(destination);
        if let Some(format) = &self.format {
            params = params.with_format(format);
        }
        if let Some(encoding) = &self.encoding {
            params = params.with_encoding(encoding);
        }
        if let Some(grid) = &self.grid {
            params = params.with_grid(grid);
        }
        if let Some(fields) = &self.fields {
            params = params.with_fields(fields.split(',').map(str::trim));
        }
        Ok(params)
    }

    /// Execute the export command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(destination = %self.destination, input = %self.input, "Starting export command");

        let params = match self.params() {
            Ok(p) => p,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(2);
            }
        };
        let pipeline = match Pipeline::build(config_path).await {
            Ok(p) => p,
            Err(code) => return Ok(code),
        };
        if let Err(code) = pipeline.start_delivery().await {
            return Ok(code);
        }

        let code = if self.input == "-" {
            self.run(&pipeline, params, tokio::io::stdin(), shutdown_signal)
                .await?
        } else {
            let file = match tokio::fs::File::open(&self.input).await {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("❌ Cannot open input {}: {e}", self.input);
                    pipeline.delivery.shutdown().await;
                    return Ok(2);
                }
            };
            self.run(&pipeline, params, file, shutdown_signal).await?
        };

        pipeline.delivery.shutdown().await;
        Ok(code)
    }

    async fn run<R>(
        &self,
        pipeline: &Pipeline,
        params: ExportParams,
        input: R,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32>
    where
        R: AsyncRead + Unpin,
    {
        let mut session = ExportSession::new(pipeline.exports.clone());
        let sink_id = match session.open(params).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open export");
                eprintln!("❌ Failed to open export: {e}");
                return Ok(exit_code_for(&e));
            }
        };
        println!("🚀 Exporting to '{}' (sink {sink_id})", self.destination);

        let mut lines = BufReader::new(input).lines();
        let mut line_no = 0u64;
        let mut rejected = 0u64;
        let mut interrupted = false;
        let mut failure = None;

        while let Some(line) = lines.next_line().await? {
            if *shutdown_signal.borrow() {
                interrupted = true;
                break;
            }
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(line = line_no, error = %e, "Skipping invalid JSON line");
                    rejected += 1;
                    continue;
                }
            };

            let partition = field_or(&record, self.partition_field.as_deref(), &self.destination);
            let key = field_or(&record, self.key_field.as_deref(), &line_no.to_string());
            if let Err(e) = session.store(None, &partition, &key, record).await {
                failure = Some(e);
                break;
            }
        }

        // close runs even after a failed store so the sink record is kept
        let closed = session.close().await;
        if let Some(e) = failure {
            tracing::error!(error = %e, "Export failed");
            eprintln!("❌ Export failed: {e}");
            return Ok(exit_code_for(&e));
        }
        let sink = match closed {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "Export failed at close");
                eprintln!("❌ Export failed at close: {e}");
                return Ok(exit_code_for(&e));
            }
        };

        println!();
        println!("📊 Export Summary:");
        if let Some(sink) = &sink {
            println!("  Sink: {}", sink.id);
            println!("  Target: {}", sink.destination_name);
            println!("  Source records: {}", sink.source_count);
            println!("  Written records: {}", sink.mapped_count);
            println!("  Parts: {}", sink.file_count);
            println!("  Status: {}", sink.transfer_status);
        }
        println!("  Invalid lines: {rejected}");

        let code = completion_exit_code(interrupted, rejected);
        match code {
            0 => println!("✅ Export completed successfully!"),
            130 => println!("⚠️  Export interrupted; written records were kept."),
            _ => println!("⚠️  Export completed with {rejected} invalid lines."),
        }
        Ok(code)
    }
}

/// String value of `field` in `record`, or `fallback`
fn field_or(record: &Value, field: Option<&str>, fallback: &str) -> String {
    match field.and_then(|f| record.get(f)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::SinkStore;
    use serde_json::json;
    use std::io::Write;

    fn args() -> ExportArgs {
        ExportArgs {
            destination: "invoices".to_string(),
            input: "-".to_string(),
            format: Some("csv".to_string()),
            encoding: None,
            grid: None,
            fields: Some("id, amount".to_string()),
            partition_field: None,
            key_field: None,
        }
    }

    #[test]
    fn test_params_from_args() {
        let params = args().params().unwrap();
        assert_eq!(params.destination_id.as_str(), "invoices");
        assert_eq!(params.format.as_deref(), Some("csv"));
        assert_eq!(
            params.fields,
            Some(vec!["id".to_string(), "amount".to_string()])
        );
    }

    #[test]
    fn test_blank_destination_is_rejected() {
        let mut a = args();
        a.destination = " ".to_string();
        assert!(matches!(a.params(), Err(ConduitError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalid_lines_exit_with_one() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(
                b"[application]\n\n[[destinations]]\nid = \"invoices\"\noutput = \"memory\"\nformat = \"csv\"\n",
            )
            .unwrap();
        let pipeline = Pipeline::build(config.path().to_str().unwrap())
            .await
            .unwrap();
        let (_tx, rx) = watch::channel(false);

        let input: &[u8] = b"{\"id\": 1, \"amount\": 5}\nnot json\n{\"id\": 2, \"amount\": 7}\n";
        let code = args()
            .run(&pipeline, args().params().unwrap(), input, rx.clone())
            .await
            .unwrap();
        assert_eq!(code, 1);

        let input: &[u8] = b"{\"id\": 3, \"amount\": 9}\n";
        let code = args()
            .run(&pipeline, args().params().unwrap(), input, rx)
            .await
            .unwrap();
        assert_eq!(code, 0);

        let sinks = pipeline.stores.sinks.list_sinks(10).await.unwrap();
        assert_eq!(sinks.len(), 2);
        assert!(sinks.iter().any(|s| s.source_count == 2 && s.mapped_count == 2));
    }

    #[test]
    fn test_field_or() {
        let record = json!({"region": "eu", "id": 7, "gone": null});
        assert_eq!(field_or(&record, Some("region"), "x"), "eu");
        assert_eq!(field_or(&record, Some("id"), "x"), "7");
        assert_eq!(field_or(&record, Some("gone"), "x"), "x");
        assert_eq!(field_or(&record, None, "x"), "x");
    }
}
