//! Bucket command implementation
//!
//! `bucket add` appends JSON Lines entries to the current bucket of a
//! qualifier; `bucket export` runs one rotate-and-export cycle.

use super::{completion_exit_code, exit_code_for, exit_code_for_response, Pipeline};
use crate::core::bucket::{BucketExportCoordinator, BucketExportRequest};
use crate::domain::{BucketEntry, ConduitError, Qualifier};
use clap::{Args, Subcommand};
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Arguments for the bucket command
#[derive(Args, Debug)]
pub struct BucketArgs {
    #[command(subcommand)]
    pub action: BucketAction,
}

#[derive(Subcommand, Debug)]
pub enum BucketAction {
    /// Append entries (one JSON object per line) to the current bucket
    Add {
        #[arg(short, long)]
        qualifier: String,

        /// JSON Lines file of bucket entries
        #[arg(short, long)]
        input: String,
    },

    /// Rotate and export, or re-export one bucket with --bucket
    Export {
        #[arg(short, long)]
        qualifier: String,

        /// Export exactly this bucket without rotating
        #[arg(short, long)]
        bucket: Option<u32>,

        /// Requested format
        #[arg(long)]
        format: Option<String>,
    },
}

impl BucketArgs {
    /// Execute the bucket command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let pipeline = match Pipeline::build(config_path).await {
            Ok(p) => p,
            Err(code) => return Ok(code),
        };
        if let Err(code) = pipeline.start_delivery().await {
            return Ok(code);
        }
        let coordinator = BucketExportCoordinator::from_config(
            &pipeline.config,
            &pipeline.stores,
            pipeline.exports.clone(),
        );

        let code = match &self.action {
            BucketAction::Add { qualifier, input } => {
                add_entries(&coordinator, qualifier, input).await?
            }
            BucketAction::Export {
                qualifier,
                bucket,
                format,
            } => export(&coordinator, qualifier, *bucket, format.clone()).await?,
        };

        pipeline.delivery.shutdown().await;
        Ok(code)
    }
}

fn parse_qualifier(qualifier: &str) -> Result<Qualifier, ConduitError> {
    Qualifier::from_str(qualifier).map_err(ConduitError::Configuration)
}

async fn add_entries(
    coordinator: &BucketExportCoordinator,
    qualifier: &str,
    input: &str,
) -> anyhow::Result<i32> {
    let qualifier = match parse_qualifier(qualifier) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("❌ {e}");
            return Ok(2);
        }
    };
    let file = match tokio::fs::File::open(input).await {
        Ok(f) => f,
        Err(e) => {
            eprintln!("❌ Cannot open input {input}: {e}");
            return Ok(2);
        }
    };

    let mut lines = BufReader::new(file).lines();
    let (mut added, mut rejected) = (0u64, 0u64);
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry: BucketEntry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping invalid bucket entry");
                rejected += 1;
                continue;
            }
        };
        if let Err(e) = coordinator.add_entry(&qualifier, &entry).await {
            tracing::error!(line = line_no, error = %e, "Failed to add bucket entry");
            eprintln!("❌ Failed to add entry on line {line_no}: {e}");
            return Ok(exit_code_for(&e));
        }
        added += 1;
    }

    println!("✅ Added {added} entries to '{qualifier}' ({rejected} invalid lines)");
    Ok(completion_exit_code(false, rejected))
}

async fn export(
    coordinator: &BucketExportCoordinator,
    qualifier: &str,
    bucket: Option<u32>,
    format: Option<String>,
) -> anyhow::Result<i32> {
    let qualifier = match parse_qualifier(qualifier) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("❌ {e}");
            return Ok(2);
        }
    };
    let mut request = BucketExportRequest::new(qualifier);
    request.bucket = bucket;
    request.format = format;

    let response = coordinator.export_bucket(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(exit_code_for_response(response.code))
}
