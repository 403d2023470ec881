//! Broker error types.

use thiserror::Error;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker-related errors.
///
/// Operations on an id with no record are not errors; they return `false`.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Backing store call failed.
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Connection pool error.
    #[error("store pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected enqueue option or configuration value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The user processor returned an error.
    #[error("processor error: {0}")]
    Processor(String),

    /// A job exceeded its processing lease.
    #[error("job timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    /// Worker lifecycle misuse.
    #[error("worker error: {0}")]
    Worker(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Returns true if this error came from the backing store.
    ///
    /// Store errors are propagated to the caller and never retried inside
    /// the broker; the worker loop treats them as transient.
    pub fn is_store_error(&self) -> bool {
        matches!(self, BrokerError::Store(_) | BrokerError::Pool(_))
    }
}
