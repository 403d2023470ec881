//! Backing-store adapter.
//!
//! The broker talks to its backing store exclusively through the [`Store`]
//! trait, which exposes the narrow set of primitives the brokerage protocol
//! needs. [`RedisStore`] is the production implementation;
//! [`MemoryStore`] backs the test suite and local development.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::BrokerResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Key builder for a queue namespace.
///
/// All keys are of the form `<prefix>:<name>:<collection>`.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
    name: String,
}

impl QueueKeys {
    /// Creates a key builder for the given prefix and queue name.
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    /// FIFO list of runnable normal-priority job ids.
    pub fn pending(&self) -> String {
        format!("{}:{}:pending", self.prefix, self.name)
    }

    /// Ordered set of runnable prioritized job ids, scored by `-priority`.
    pub fn priority(&self) -> String {
        format!("{}:{}:priority", self.prefix, self.name)
    }

    /// Ordered set of delayed job ids, scored by their due time (ms epoch).
    pub fn delayed(&self) -> String {
        format!("{}:{}:delayed", self.prefix, self.name)
    }

    /// Hash of leased job ids to dequeue timestamps (ms epoch).
    pub fn processing(&self) -> String {
        format!("{}:{}:processing", self.prefix, self.name)
    }

    /// Append-only list of completed job ids.
    pub fn completed(&self) -> String {
        format!("{}:{}:completed", self.prefix, self.name)
    }

    /// Append-only list of permanently failed job ids.
    pub fn failed(&self) -> String {
        format!("{}:{}:failed", self.prefix, self.name)
    }

    /// Hash of job ids to serialized records. The store of truth.
    pub fn jobs(&self) -> String {
        format!("{}:{}:jobs", self.prefix, self.name)
    }

    /// Hash of best-effort stat counters.
    pub fn stats(&self) -> String {
        format!("{}:{}:stats", self.prefix, self.name)
    }
}

/// Atomic primitives the broker requires of its backing store.
///
/// Each method is a single atomic operation. The two `*_to_hash` moves
/// fuse a pop with the insertion of the popped member into a hash; the
/// dequeue path depends on that fusion to never strand a job between
/// collections.
#[async_trait]
pub trait Store: Send + Sync {
    /// Sets a hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> BrokerResult<()>;

    /// Reads a hash field.
    async fn hget(&self, key: &str, field: &str) -> BrokerResult<Option<String>>;

    /// Reads all fields of a hash.
    async fn hgetall(&self, key: &str) -> BrokerResult<HashMap<String, String>>;

    /// Deletes a hash field. Returns the number of fields removed (0 or 1).
    async fn hdel(&self, key: &str, field: &str) -> BrokerResult<u64>;

    /// Adds `delta` to an integer hash field, creating it at 0 if absent.
    /// Returns the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> BrokerResult<i64>;

    /// Returns the number of fields in a hash.
    async fn hlen(&self, key: &str) -> BrokerResult<u64>;

    /// Appends a value to the tail of a list. Returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> BrokerResult<u64>;

    /// Pops the head of a list.
    async fn lpop(&self, key: &str) -> BrokerResult<Option<String>>;

    /// Returns the length of a list.
    async fn llen(&self, key: &str) -> BrokerResult<u64>;

    /// Adds a member to an ordered set, replacing its score if present.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> BrokerResult<()>;

    /// Pops up to `count` members with the lowest scores.
    async fn zpopmin(&self, key: &str, count: usize) -> BrokerResult<Vec<(String, f64)>>;

    /// Returns members with scores in `[min, max]`, in ascending score order.
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> BrokerResult<Vec<String>>;

    /// Removes a member from an ordered set. Returns the number removed.
    async fn zrem(&self, key: &str, member: &str) -> BrokerResult<u64>;

    /// Returns the cardinality of an ordered set.
    async fn zcard(&self, key: &str) -> BrokerResult<u64>;

    /// Pops the lowest-scored member of `zset` and sets it as a field of
    /// `hash` with the given value, as one indivisible step.
    async fn zpopmin_to_hash(
        &self,
        zset: &str,
        hash: &str,
        value: &str,
    ) -> BrokerResult<Option<String>>;

    /// Pops the head of `list` and sets it as a field of `hash` with the
    /// given value, as one indivisible step.
    async fn lpop_to_hash(
        &self,
        list: &str,
        hash: &str,
        value: &str,
    ) -> BrokerResult<Option<String>>;

    /// Releases the underlying connections, if any.
    fn close(&self) {}
}
