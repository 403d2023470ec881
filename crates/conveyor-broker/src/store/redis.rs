//! Redis-backed store.

use super::Store;
use crate::config::RedisConfig;
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::info;

/// ZPOPMIN fused with HSET of the popped member.
const ZPOPMIN_TO_HASH: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then
    return false
end
redis.call('HSET', KEYS[2], popped[1], ARGV[1])
return popped[1]
"#;

/// LPOP fused with HSET of the popped value.
const LPOP_TO_HASH: &str = r#"
local id = redis.call('LPOP', KEYS[1])
if not id then
    return false
end
redis.call('HSET', KEYS[2], id, ARGV[1])
return id
"#;

/// Redis implementation of the backing-store adapter.
///
/// The fused dequeue moves run as Lua scripts, which Redis executes
/// atomically.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Connects to Redis and verifies the connection with a PING.
    pub async fn connect(config: &RedisConfig) -> BrokerResult<Self> {
        info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");

        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map_err(|e| BrokerError::Configuration(format!("invalid Redis config: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BrokerError::Configuration(format!("failed to create pool: {e}")))?;

        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;

        info!("Redis connection pool ready");

        Ok(Self { pool })
    }

    /// Wraps an existing connection pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> BrokerResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> BrokerResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> BrokerResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.hdel(key, field).await?)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> BrokerResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn hlen(&self, key: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.hlen(key).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.rpush(key, value).await?)
    }

    async fn lpop(&self, key: &str) -> BrokerResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lpop(key, None).await?)
    }

    async fn llen(&self, key: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zpopmin(&self, key: &str, count: usize) -> BrokerResult<Vec<(String, f64)>> {
        let mut conn = self.conn().await?;
        Ok(conn.zpopmin(key, count as isize).await?)
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> BrokerResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.zrangebyscore(key, min, max).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zrem(key, member).await?)
    }

    async fn zcard(&self, key: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn zpopmin_to_hash(
        &self,
        zset: &str,
        hash: &str,
        value: &str,
    ) -> BrokerResult<Option<String>> {
        let mut conn = self.conn().await?;
        let popped: Option<String> = redis::Script::new(ZPOPMIN_TO_HASH)
            .key(zset)
            .key(hash)
            .arg(value)
            .invoke_async(&mut *conn)
            .await?;
        Ok(popped)
    }

    async fn lpop_to_hash(
        &self,
        list: &str,
        hash: &str,
        value: &str,
    ) -> BrokerResult<Option<String>> {
        let mut conn = self.conn().await?;
        let popped: Option<String> = redis::Script::new(LPOP_TO_HASH)
            .key(list)
            .key(hash)
            .arg(value)
            .invoke_async(&mut *conn)
            .await?;
        Ok(popped)
    }

    fn close(&self) {
        self.pool.close();
    }
}
