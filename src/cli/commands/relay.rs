//! Relay command implementation
//!
//! Opens the configured delivery queues and forwards messages until a
//! shutdown signal arrives, then drains every queue.

use super::Pipeline;
use clap::Args;
use std::time::Duration;
use tokio::sync::watch;

/// Arguments for the relay command
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Only open these queues (repeatable); all configured queues by default
    #[arg(short, long)]
    pub queue: Vec<String>,

    /// Seconds between status log lines, 0 to disable
    #[arg(long, default_value_t = 60)]
    pub status_interval: u64,
}

impl RelayArgs {
    /// Execute the relay command
    pub async fn execute(
        &self,
        config_path: &str,
        mut shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        let pipeline = match Pipeline::build(config_path).await {
            Ok(p) => p,
            Err(code) => return Ok(code),
        };

        let queues: Vec<_> = pipeline
            .config
            .delivery
            .queues
            .iter()
            .filter(|q| self.queue.is_empty() || self.queue.iter().any(|id| id == q.id.as_str()))
            .cloned()
            .collect();
        if queues.is_empty() {
            eprintln!("❌ No matching delivery queues configured");
            return Ok(2);
        }
        if let Err(e) = pipeline.delivery.start(&queues).await {
            tracing::error!(error = %e, "Failed to open delivery queues");
            eprintln!("❌ Failed to open delivery queues: {e}");
            pipeline.delivery.shutdown().await;
            return Ok(super::exit_code_for(&e));
        }
        println!("🚀 Relaying {} queue(s); press Ctrl+C to stop", queues.len());

        let mut ticker = (self.status_interval > 0)
            .then(|| tokio::time::interval(Duration::from_secs(self.status_interval)));
        loop {
            tokio::select! {
                changed = shutdown_signal.changed() => {
                    if changed.is_err() || *shutdown_signal.borrow() {
                        break;
                    }
                }
                _ = async {
                    match ticker.as_mut() {
                        Some(t) => { t.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    for id in pipeline.delivery.queue_ids() {
                        match pipeline.delivery.status(&id).await {
                            Ok(status) => tracing::info!(
                                queue = %id,
                                gate = %status.gate,
                                running = status.running,
                                pending = status.pending,
                                "Queue status"
                            ),
                            Err(e) => tracing::warn!(queue = %id, error = %e, "Cannot read queue status"),
                        }
                    }
                }
            }
        }

        println!("⚠️  Shutdown signal received, draining queues...");
        pipeline.delivery.shutdown().await;
        println!("✅ Relay stopped");
        Ok(0)
    }
}
