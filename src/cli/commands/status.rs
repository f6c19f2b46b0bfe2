//! Status command implementation
//!
//! Prints recent sinks, the counters of configured bucket qualifiers and the
//! backlog of every configured queue. Queues are inspected through the broker
//! directly, without starting workers.

use super::Pipeline;
use crate::adapters::broker;
use crate::domain::{BucketCounter, SinkRecord};
use clap::Args;
use serde::Serialize;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of recent sinks to show
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct QueueBacklog {
    queue: String,
    topic: String,
    pending: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    sinks: Vec<SinkRecord>,
    buckets: Vec<BucketCounter>,
    queues: Vec<QueueBacklog>,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking status");

        let pipeline = match Pipeline::build(config_path).await {
            Ok(p) => p,
            Err(code) => return Ok(code),
        };

        let sinks = match pipeline.stores.sinks.list_sinks(self.limit).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to load sinks: {e}");
                return Ok(4);
            }
        };

        let mut buckets = Vec::new();
        for q in &pipeline.config.bucket.qualifiers {
            match pipeline
                .stores
                .buckets
                .load_counter(&q.qualifier, q.max_buckets)
                .await
            {
                Ok(counter) => buckets.push(counter),
                Err(e) => {
                    eprintln!("❌ Failed to load bucket counter '{}': {e}", q.qualifier);
                    return Ok(4);
                }
            }
        }

        let mut queues = Vec::new();
        for queue in &pipeline.config.delivery.queues {
            let Ok(settings) = queue.resolve(&pipeline.config.delivery.defaults) else {
                continue;
            };
            let pending = match broker::connect(&settings.broker_address).await {
                Ok(b) => b.pending(&settings.topic, settings.id.as_str()).await,
                Err(e) => Err(e),
            };
            let (pending, error) = match pending {
                Ok(n) => (Some(n), None),
                Err(e) => (None, Some(e.to_string())),
            };
            queues.push(QueueBacklog {
                queue: settings.id.to_string(),
                topic: settings.topic,
                pending,
                error,
            });
        }

        let report = StatusReport {
            sinks,
            buckets,
            queues,
        };
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(0)
    }
}

fn print_report(report: &StatusReport) {
    println!("📊 Conduit Status");
    println!();
    println!("Recent sinks:");
    if report.sinks.is_empty() {
        println!("  (none)");
    }
    for sink in &report.sinks {
        println!(
            "  {:>6}  {:<20} {:<16} {:>8} records  {}",
            sink.id.value(),
            sink.destination_id.as_str(),
            sink.transfer_status.as_str(),
            sink.mapped_count,
            sink.destination_name
        );
    }

    println!();
    println!("Buckets:");
    for counter in &report.buckets {
        let marker = counter
            .in_progress
            .map_or_else(|| "-".to_string(), |b| b.to_string());
        println!(
            "  {:<20} current {}/{}  in progress {}",
            counter.qualifier.as_str(),
            counter.current,
            counter.max_buckets,
            marker
        );
    }

    println!();
    println!("Queues:");
    for queue in &report.queues {
        match (&queue.pending, &queue.error) {
            (Some(pending), _) => {
                println!("  {:<20} {:<24} {pending} pending", queue.queue, queue.topic)
            }
            (None, Some(error)) => println!("  {:<20} {:<24} ❌ {error}", queue.queue, queue.topic),
            (None, None) => println!("  {:<20} {:<24} unknown", queue.queue, queue.topic),
        }
    }
}
