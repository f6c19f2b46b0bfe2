//! Validate config command implementation
//!
//! Loads the configuration (which validates it) and prints a summary.
//! Credentials are never printed.

use crate::config::{load_config, ConduitConfig, PersistenceBackend};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Also resolve every queue against the delivery defaults
    #[arg(long)]
    pub strict: bool,
}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        if self.strict {
            if let Err(e) = resolve_queues(&config) {
                println!("❌ Queue configuration is incomplete");
                println!("   Error: {e}");
                return Ok(2);
            }
        }

        println!("✅ Configuration is valid");
        println!();
        print_summary(&config);
        Ok(0)
    }
}

fn resolve_queues(config: &ConduitConfig) -> Result<(), String> {
    for queue in &config.delivery.queues {
        queue.resolve(&config.delivery.defaults)?;
    }
    Ok(())
}

fn print_summary(config: &ConduitConfig) {
    println!("Configuration Summary:");
    println!("  Tenant: {}", config.application.tenant_id);
    println!("  Log Level: {}", config.application.log_level);
    match config.persistence.backend {
        PersistenceBackend::Memory => println!("  Persistence: memory"),
        PersistenceBackend::PostgreSQL => {
            println!("  Persistence: postgresql");
            if let Some(pg) = &config.persistence.postgresql {
                println!("  Max Connections: {}", pg.max_connections);
                println!("  SSL Mode: {}", pg.ssl_mode);
            }
        }
    }

    println!("  Destinations: {}", config.destinations.len());
    for d in &config.destinations {
        println!(
            "    - {} ({} / {})",
            d.id,
            d.output,
            d.format.as_deref().unwrap_or("format per export")
        );
    }
    println!("  Bucket qualifiers: {}", config.bucket.qualifiers.len());
    for q in &config.bucket.qualifiers {
        println!(
            "    - {} -> {} ({} buckets)",
            q.qualifier, q.destination, q.max_buckets
        );
    }
    println!("  Delivery queues: {}", config.delivery.queues.len());
    println!("  Delivery channels: {}", config.delivery.channels.len());
    println!();
}
