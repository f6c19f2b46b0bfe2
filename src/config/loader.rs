//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{ConduitConfig, PersistenceBackend};
use crate::config::secret_string;
use crate::domain::errors::ConduitError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`ConduitConfig`]
/// 4. Applies environment variable overrides (`CONDUIT_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`ConduitError::Configuration`] for every failure above.
///
/// # Examples
///
/// ```no_run
/// use conduit::config::loader::load_config;
///
/// let config = load_config("conduit.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<ConduitConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConduitError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        ConduitError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses configuration text, applying substitution, overrides and validation
///
/// # Errors
///
/// Same as [`load_config`], minus the file access.
pub fn parse_config(contents: &str) -> Result<ConduitConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: ConduitConfig = toml::from_str(&contents)?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        ConduitError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern is valid")
    })
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are copied verbatim.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let processed = re.replace_all(line, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        result.push_str(&processed);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(ConduitError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val.trim().parse::<T>().map(Some).map_err(|_| {
            ConduitError::Configuration(format!("Invalid value '{val}' for {name}"))
        }),
        Err(_) => Ok(None),
    }
}

/// Applies environment variable overrides using the `CONDUIT_*` prefix
///
/// Variables follow the pattern `CONDUIT_<SECTION>_<KEY>`, for example
/// `CONDUIT_APPLICATION_LOG_LEVEL` or `CONDUIT_DELIVERY_BROKER_ADDRESS`.
fn apply_env_overrides(config: &mut ConduitConfig) -> Result<()> {
    // Application
    if let Ok(val) = std::env::var("CONDUIT_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Ok(val) = std::env::var("CONDUIT_APPLICATION_TENANT_ID") {
        config.application.tenant_id = val;
    }

    // Persistence
    if let Ok(val) = std::env::var("CONDUIT_PERSISTENCE_BACKEND") {
        config.persistence.backend = match val.to_lowercase().as_str() {
            "memory" => PersistenceBackend::Memory,
            "postgresql" => PersistenceBackend::PostgreSQL,
            other => {
                return Err(ConduitError::Configuration(format!(
                    "Invalid CONDUIT_PERSISTENCE_BACKEND '{other}'. Must be one of: memory, postgresql"
                )))
            }
        };
    }
    if let Some(pg) = config.persistence.postgresql.as_mut() {
        if let Ok(val) = std::env::var("CONDUIT_POSTGRESQL_CONNECTION_STRING") {
            pg.connection_string = secret_string(val);
        }
        if let Some(max) = parse_env("CONDUIT_POSTGRESQL_MAX_CONNECTIONS")? {
            pg.max_connections = max;
        }
    }

    // Bucket
    if let Some(grace) = parse_env("CONDUIT_BUCKET_GRACE_PERIOD_MS")? {
        config.bucket.grace_period_ms = grace;
    }

    // Delivery defaults
    if let Ok(val) = std::env::var("CONDUIT_DELIVERY_BROKER_ADDRESS") {
        config.delivery.defaults.broker_address = Some(val);
    }
    if let Ok(val) = std::env::var("CONDUIT_DELIVERY_TOPIC_PREFIX") {
        config.delivery.defaults.topic_prefix = Some(val);
    }
    if let Some(timeout) = parse_env("CONDUIT_DELIVERY_TIMEOUT_MS")? {
        config.delivery.defaults.timeout_ms = timeout;
    }
    if let Some(backoff) = parse_env("CONDUIT_DELIVERY_BACKOFF_MS")? {
        config.delivery.defaults.backoff_ms = backoff;
    }
    if let Some(timeout) = parse_env("CONDUIT_DELIVERY_SHUTDOWN_TIMEOUT_MS")? {
        config.delivery.defaults.shutdown_timeout_ms = timeout;
    }

    // Logging
    if let Some(enabled) = parse_env("CONDUIT_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = enabled;
    }
    if let Ok(val) = std::env::var("CONDUIT_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
    if let Ok(val) = std::env::var("CONDUIT_LOGGING_LOCAL_ROTATION") {
        config.logging.local_rotation = val;
    }

    Ok(())
}
