//! Broker configuration.

use crate::error::{BrokerError, BrokerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a queue broker.
///
/// Unknown fields are rejected at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Queue name. All backing-store keys live under this namespace.
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of failures before a job is permanently failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Multiplicative backoff applied per failed attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,

    /// Processing lease duration in milliseconds. Jobs held longer than
    /// this are considered stalled and reclaimed.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_ms: u64,

    /// Maintenance cadence in milliseconds (delayed promotion and the
    /// stalled sweep).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,

    /// Advisory upper bound for the worker pool size.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            retry_backoff: default_retry_backoff(),
            job_timeout_ms: default_job_timeout(),
            cleanup_interval_ms: default_cleanup_interval(),
            max_concurrency: default_max_concurrency(),
            redis: RedisConfig::default(),
        }
    }
}

fn default_name() -> String {
    "default".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_job_timeout() -> u64 {
    30_000
}

fn default_cleanup_interval() -> u64 {
    60_000
}

fn default_max_concurrency() -> usize {
    10
}

impl BrokerConfig {
    /// Creates a configuration for the named queue with all other fields
    /// at their defaults.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BrokerResult<()> {
        if self.name.is_empty() {
            return Err(BrokerError::InvalidArgument(
                "queue name must not be empty".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(BrokerError::InvalidArgument(
                "max_retries must be positive".to_string(),
            ));
        }
        if self.retry_backoff < 1.0 {
            return Err(BrokerError::InvalidArgument(
                "retry_backoff must be at least 1.0".to_string(),
            ));
        }
        if self.job_timeout_ms == 0 {
            return Err(BrokerError::InvalidArgument(
                "job_timeout_ms must be positive".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(BrokerError::InvalidArgument(
                "cleanup_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the processing lease as a Duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    /// Returns the maintenance cadence as a Duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Prefix for all queue keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "queue".to_string()
}

/// Worker loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Idle sleep between polls when no job is available, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

impl WorkerConfig {
    /// Returns the idle sleep as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
