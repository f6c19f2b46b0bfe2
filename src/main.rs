// Conduit - Export Sessions and Asynchronous Delivery
// Copyright (c) 2025 Conduit Contributors
// Licensed under the MIT License

use conduit::cli::{Cli, Commands};
use conduit::config::{load_config, LoggingConfig};
use conduit::logging::init_logging;
use clap::Parser;
use std::process;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // File logging follows the configuration when it loads; otherwise the
    // command reports the configuration error itself on the console
    let (config_level, logging_config) = match load_config(&cli.config) {
        Ok(config) => (Some(config.application.log_level), config.logging),
        Err(_) => (
            None,
            LoggingConfig {
                local_enabled: false,
                ..LoggingConfig::default()
            },
        ),
    };
    let log_level = cli
        .log_level
        .clone()
        .or(config_level)
        .unwrap_or_else(|| "info".to_string());
    let logging_guard = match init_logging(&log_level, &logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(5);
        }
    };

    let run_id = uuid::Uuid::new_v4();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        run_id = %run_id,
        "Conduit - export sessions and asynchronous delivery"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(shutdown_tx));

    let exit_code = match execute_command(&cli, shutdown_rx)
        .instrument(tracing::info_span!("run", run_id = %run_id))
        .await
    {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            5
        }
    };

    // flush the file writer before exiting
    drop(logging_guard);
    process::exit(exit_code);
}

/// Flips the shutdown channel on SIGINT or SIGTERM
async fn wait_for_signal(shutdown_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
        println!("\n⚠️  Shutdown signal received, finishing current work...");
        let _ = shutdown_tx.send(true);
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        } else {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            println!("\n⚠️  Shutdown signal received, finishing current work...");
            let _ = shutdown_tx.send(true);
        }
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli, shutdown_signal: watch::Receiver<bool>) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Export(args) => args.execute(&cli.config, shutdown_signal).await,
        Commands::Bucket(args) => args.execute(&cli.config).await,
        Commands::Relay(args) => args.execute(&cli.config, shutdown_signal).await,
        Commands::Status(args) => args.execute(&cli.config).await,
        Commands::ValidateConfig(args) => args.execute(&cli.config).await,
    }
}
