//! Configuration management for Bucketeer.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{BucketeerError, Result};
use crate::ratelimit::{check_shard_amount, PolicyRefresh, RecoveryPolicy};

/// Main configuration for the Bucketeer service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketeerConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Units replenished per second for units without a specific policy
    #[serde(default = "default_fill_rate")]
    pub default_fill_rate: i64,

    /// Budget ceiling for units without a specific policy
    #[serde(default = "default_max_budget")]
    pub default_max_budget: i64,

    /// When a bucket picks up changes to its resolved policy
    #[serde(default)]
    pub policy_refresh: PolicyRefresh,

    /// Number of lock shards in the bucket map (0 lets dashmap decide)
    #[serde(default)]
    pub shard_amount: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_fill_rate: default_fill_rate(),
            default_max_budget: default_max_budget(),
            policy_refresh: PolicyRefresh::default(),
            shard_amount: 0,
        }
    }
}

impl LimiterConfig {
    /// The policy applied to every unit by the default resolver.
    pub fn default_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::new(self.default_fill_rate, self.default_max_budget)
    }
}

fn default_fill_rate() -> i64 {
    10
}

fn default_max_budget() -> i64 {
    1_000_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BucketeerConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BucketeerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| BucketeerError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        let limiter = &self.limiter;
        if limiter.default_fill_rate < 0 || limiter.default_max_budget < 0 {
            return Err(BucketeerError::Config(format!(
                "default policy must be non-negative (fill_rate={}, max_budget={})",
                limiter.default_fill_rate, limiter.default_max_budget
            )));
        }

        check_shard_amount(limiter.shard_amount)
    }
}
