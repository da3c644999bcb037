//! Configuration
//!
//! Composite configuration for the service manager: the global execution
//! defaults plus the per-component configs for pooling, sessions, rate
//! limiting, health sweeps, and logging. Loadable from YAML with validation.

use crate::health::HealthConfig;
use crate::pool::PoolConfig;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::{Validate, ValidationError};

/// Top-level manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ManagerConfig {
    /// Master enable flag, persisted alongside the rest of the config and
    /// interpreted by embedders rather than by the manager itself
    pub enabled: bool,

    /// Global operation timeout in milliseconds, used when neither the call
    /// nor the service config overrides it
    #[validate(range(min = 100, max = 600000))]
    pub timeout_ms: u64,

    /// Name of the retry policy applied when a service config names an
    /// unknown one
    #[validate(custom = "validate_policy_name")]
    pub default_retry_policy: String,

    /// Connection pool configuration
    #[validate]
    pub pool: PoolConfig,

    /// Session tracking configuration
    #[validate]
    pub sessions: SessionConfig,

    /// Rate limiting configuration
    #[validate]
    pub rate_limit: RateLimitConfig,

    /// Health sweep configuration
    #[validate]
    pub health: HealthConfig,

    /// Logging configuration
    #[validate]
    pub logging: LoggingConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 30_000,
            default_retry_policy: "moderate".to_string(),
            pool: PoolConfig::default(),
            sessions: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            health: HealthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Load and validate configuration from a YAML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ManagerConfig =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse configuration YAML")?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level
    #[validate(custom = "validate_log_level")]
    pub level: String,

    /// Log format (json, pretty, compact)
    #[validate(custom = "validate_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// Validation functions

fn validate_policy_name(name: &str) -> std::result::Result<(), ValidationError> {
    match crate::retry::RetryPolicy::named(name) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("Unknown retry policy name")),
    }
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("Invalid log level")),
    }
}

fn validate_log_format(format: &str) -> std::result::Result<(), ValidationError> {
    match format.to_lowercase().as_str() {
        "json" | "pretty" | "compact" => Ok(()),
        _ => Err(ValidationError::new("Invalid log format")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validates() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.default_retry_policy, "moderate");
    }

    #[test]
    fn test_unknown_policy_name_rejected() {
        let config = ManagerConfig {
            default_retry_policy: "frantic".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_config_from_file() {
        let yaml_content = r#"
enabled: true
timeout_ms: 20000
default_retry_policy: "conservative"
pool:
  max_connections: 4
  min_connections: 1
  max_idle_time_ms: 60000
  acquire_timeout_ms: 5000
sessions:
  session_timeout_minutes: 15
  max_sessions_per_service: 50
rate_limit:
  requests_per_minute: 30
  requests_per_hour: 500
  burst: 5
health:
  enabled: false
  check_interval_seconds: 60
logging:
  level: "debug"
  format: "json"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ManagerConfig::from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.default_retry_policy, "conservative");
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.rate_limit.burst, 5);
        assert!(!config.health.enabled);
    }

    #[tokio::test]
    async fn test_out_of_range_values_rejected() {
        let yaml_content = r#"
enabled: true
timeout_ms: 1
default_retry_policy: "moderate"
pool:
  max_connections: 4
  min_connections: 1
  max_idle_time_ms: 60000
  acquire_timeout_ms: 5000
sessions:
  session_timeout_minutes: 15
  max_sessions_per_service: 50
rate_limit:
  requests_per_minute: 30
  requests_per_hour: 500
  burst: 5
health:
  enabled: true
  check_interval_seconds: 60
logging:
  level: "info"
  format: "pretty"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        assert!(ManagerConfig::from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_validation_functions() {
        assert!(validate_log_level("info").is_ok());
        assert!(validate_log_level("invalid").is_err());
        assert!(validate_log_format("json").is_ok());
        assert!(validate_log_format("xml").is_err());
        assert!(validate_policy_name("moderate").is_ok());
        assert!(validate_policy_name("frantic").is_err());
    }
}
