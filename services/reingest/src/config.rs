//! Configuration for the reingestion function.
//!
//! All settings come from environment variables set on the function:
//! `REGION`, `FIREHOSE_DEST`, `MAX_REINGEST` and `S3_FAILED_PREFIX` are
//! required, everything else has a default.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use config::{Environment, Map};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the reingestion function
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// AWS region for the S3 and Firehose clients
    pub region: String,
    /// Firehose delivery stream that records are written back to
    pub firehose_dest: String,
    /// Maximum number of reingestion attempts per record
    pub max_reingest: u64,
    /// Key prefix for objects holding quarantined records
    pub s3_failed_prefix: String,
    /// Name of the counter inside each record's `fields` object
    #[serde(default = "default_reingest_field")]
    pub reingest_field: String,
    /// Attempts per Firehose batch before giving up
    #[serde(default = "default_firehose_max_attempts")]
    pub firehose_max_attempts: u32,
    /// Initial delay between Firehose retries in milliseconds
    #[serde(default = "default_retry_initial_interval_ms")]
    pub retry_initial_interval_ms: u64,
    /// Maximum delay between Firehose retries in milliseconds
    #[serde(default = "default_retry_max_interval_ms")]
    pub retry_max_interval_ms: u64,
    /// Custom S3 endpoint URL (for LocalStack, MinIO, etc.)
    pub s3_endpoint_url: Option<String>,
    /// Force path-style S3 access
    #[serde(default)]
    pub s3_force_path_style: bool,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

const REQUIRED_KEYS: [&str; 4] = ["region", "firehose_dest", "max_reingest", "s3_failed_prefix"];

// Default value functions
fn default_reingest_field() -> String {
    "reingest_count".to_string()
}

fn default_firehose_max_attempts() -> u32 {
    20
}

fn default_retry_initial_interval_ms() -> u64 {
    100
}

fn default_retry_max_interval_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and validate configuration from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    /// Load and validate configuration from an explicit set of variables
    pub fn from_vars(vars: Map<String, String>) -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default().source(Some(vars)))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            // MAX_REINGEST -> max_reingest
            .add_source(env.try_parsing(true))
            .build()?;

        for key in REQUIRED_KEYS {
            if raw.get_string(key).is_err() {
                return Err(ConfigError::MissingRequired(key.to_uppercase()));
            }
        }

        let config: Self = raw.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("REGION", &self.region),
            ("FIREHOSE_DEST", &self.firehose_dest),
            ("S3_FAILED_PREFIX", &self.s3_failed_prefix),
            ("REINGEST_FIELD", &self.reingest_field),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired(key.to_string()));
            }
        }

        if self.firehose_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FIREHOSE_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.retry_max_interval_ms < self.retry_initial_interval_ms {
            return Err(ConfigError::InvalidValue {
                key: "RETRY_MAX_INTERVAL_MS".to_string(),
                message: format!(
                    "must not be below RETRY_INITIAL_INTERVAL_MS ({})",
                    self.retry_initial_interval_ms
                ),
            });
        }

        Ok(())
    }

    /// Retry policy for Firehose batch writes
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.firehose_max_attempts,
            initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            max_interval: Duration::from_millis(self.retry_max_interval_ms),
        }
    }
}
