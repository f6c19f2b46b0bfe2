//! CLI command implementations
//!
//! Exit codes shared by every command:
//!
//! | Code | Meaning                                    |
//! |------|--------------------------------------------|
//! | 0    | success                                    |
//! | 1    | completed, but invalid input lines skipped |
//! | 2    | configuration error                        |
//! | 4    | persistence or broker connection error     |
//! | 5    | fatal error                                |
//! | 130  | interrupted by a shutdown signal           |

pub mod bucket;
pub mod export;
pub mod relay;
pub mod status;
pub mod validate;

use crate::adapters::persistence::{create_stores, Stores};
use crate::config::{load_config, ConduitConfig};
use crate::core::delivery::{DeliveryService, ListenerChain, LoggingListener, SinkStatusListener};
use crate::core::export::ExportContext;
use crate::domain::{ConduitError, ResponseCode};
use std::sync::Arc;

/// Stores, delivery service and export context for one command run
pub(crate) struct Pipeline {
    pub config: ConduitConfig,
    pub stores: Stores,
    pub delivery: Arc<DeliveryService>,
    pub exports: Arc<ExportContext>,
}

impl Pipeline {
    /// Loads the configuration and connects the stores
    ///
    /// Returns the exit code to use when setup fails.
    pub async fn build(config_path: &str) -> Result<Self, i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("❌ Failed to load configuration: {e}");
                return Err(2);
            }
        };

        let stores = match create_stores(&config).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to persistence");
                eprintln!("❌ Failed to connect to persistence: {e}");
                return Err(exit_code_for(&e));
            }
        };

        let listener = ListenerChain::new()
            .with(Arc::new(LoggingListener))
            .with(Arc::new(SinkStatusListener::new(stores.sinks.clone())));
        let delivery = Arc::new(DeliveryService::from_config(&config, Arc::new(listener)));
        let exports = match ExportContext::from_config(&config, &stores, Some(delivery.clone())) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                tracing::error!(error = %e, "Invalid grid configuration");
                eprintln!("❌ Invalid grid configuration: {e}");
                return Err(exit_code_for(&e));
            }
        };

        Ok(Self {
            config,
            stores,
            delivery,
            exports,
        })
    }

    /// Opens every configured queue so mirrored records are forwarded
    pub async fn start_delivery(&self) -> Result<(), i32> {
        self.delivery
            .start(&self.config.delivery.queues)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to open delivery queues");
                eprintln!("❌ Failed to open delivery queues: {e}");
                exit_code_for(&e)
            })
    }
}

/// Exit code for an error that ended a command
pub(crate) fn exit_code_for(err: &ConduitError) -> i32 {
    exit_code_for_response(ResponseCode::from(err))
}

/// Exit code for a run that ended without a fatal error
pub(crate) fn completion_exit_code(interrupted: bool, rejected: u64) -> i32 {
    if interrupted {
        130
    } else if rejected > 0 {
        1
    } else {
        0
    }
}

/// Exit code for a structured export response
pub(crate) fn exit_code_for_response(code: ResponseCode) -> i32 {
    match code {
        ResponseCode::Ok | ResponseCode::NoData => 0,
        ResponseCode::Configuration | ResponseCode::Duplicate | ResponseCode::Sequencing => 2,
        ResponseCode::Persistence | ResponseCode::Delivery => 4,
        ResponseCode::Destination | ResponseCode::Internal => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ResponseCode::Ok, 0)]
    #[test_case(ResponseCode::NoData, 0)]
    #[test_case(ResponseCode::Configuration, 2)]
    #[test_case(ResponseCode::Duplicate, 2)]
    #[test_case(ResponseCode::Persistence, 4)]
    #[test_case(ResponseCode::Destination, 5)]
    fn test_exit_code_for_response(code: ResponseCode, expected: i32) {
        assert_eq!(exit_code_for_response(code), expected);
    }

    #[test_case(false, 0, 0)]
    #[test_case(false, 3, 1)]
    #[test_case(true, 0, 130)]
    #[test_case(true, 3, 130)]
    fn test_completion_exit_code(interrupted: bool, rejected: u64, expected: i32) {
        assert_eq!(completion_exit_code(interrupted, rejected), expected);
    }

    #[test]
    fn test_exit_code_for_error() {
        let err = ConduitError::FormatUnspecified("invoices".to_string());
        assert_eq!(exit_code_for(&err), 2);
        assert_eq!(exit_code_for(&ConduitError::Delivery("down".to_string())), 4);
    }

    #[tokio::test]
    async fn test_pipeline_missing_config() {
        let result = Pipeline::build("/nonexistent/conduit.toml").await;
        assert_eq!(result.err(), Some(2));
    }
}
