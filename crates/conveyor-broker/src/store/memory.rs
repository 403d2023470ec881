//! In-process store for tests and local development.

use super::Store;
use crate::error::BrokerResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    // Kept sorted by score; members with equal scores stay in insertion order.
    zsets: HashMap<String, Vec<(String, f64)>>,
}

impl Inner {
    fn zinsert(&mut self, key: &str, score: f64, member: &str) {
        let set = self.zsets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        let pos = set.partition_point(|(_, s)| *s <= score);
        set.insert(pos, (member.to_string(), score));
    }
}

/// Single-mutex implementation of the backing-store adapter.
///
/// Every primitive takes the one lock, so the fused dequeue moves are
/// atomic by construction. Not intended for cross-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> BrokerResult<()> {
        self.inner
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> BrokerResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> BrokerResult<HashMap<String, String>> {
        Ok(self.inner.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> BrokerResult<u64> {
        let removed = self
            .inner
            .lock()
            .hashes
            .get_mut(key)
            .and_then(|h| h.remove(field))
            .is_some();
        Ok(u64::from(removed))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> BrokerResult<i64> {
        let mut inner = self.inner.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current = hash
            .get(field)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hlen(&self, key: &str) -> BrokerResult<u64> {
        Ok(self.inner.lock().hashes.get(key).map_or(0, |h| h.len() as u64))
    }

    async fn rpush(&self, key: &str, value: &str) -> BrokerResult<u64> {
        let mut inner = self.inner.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn lpop(&self, key: &str) -> BrokerResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .lists
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }

    async fn llen(&self, key: &str) -> BrokerResult<u64> {
        Ok(self.inner.lock().lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> BrokerResult<()> {
        self.inner.lock().zinsert(key, score, member);
        Ok(())
    }

    async fn zpopmin(&self, key: &str, count: usize) -> BrokerResult<Vec<(String, f64)>> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let n = count.min(set.len());
        Ok(set.drain(..n).collect())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> BrokerResult<Vec<String>> {
        Ok(self.inner.lock().zsets.get(key).map_or_else(Vec::new, |set| {
            set.iter()
                .filter(|(_, s)| *s >= min && *s <= max)
                .map(|(m, _)| m.clone())
                .collect()
        }))
    }

    async fn zrem(&self, key: &str, member: &str) -> BrokerResult<u64> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(m, _)| m != member);
        Ok((before - set.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> BrokerResult<u64> {
        Ok(self.inner.lock().zsets.get(key).map_or(0, |s| s.len() as u64))
    }

    async fn zpopmin_to_hash(
        &self,
        zset: &str,
        hash: &str,
        value: &str,
    ) -> BrokerResult<Option<String>> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.zsets.get_mut(zset) else {
            return Ok(None);
        };
        if set.is_empty() {
            return Ok(None);
        }
        let (member, _) = set.remove(0);
        inner
            .hashes
            .entry(hash.to_string())
            .or_default()
            .insert(member.clone(), value.to_string());
        Ok(Some(member))
    }

    async fn lpop_to_hash(
        &self,
        list: &str,
        hash: &str,
        value: &str,
    ) -> BrokerResult<Option<String>> {
        let mut inner = self.inner.lock();
        let Some(popped) = inner.lists.get_mut(list).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        inner
            .hashes
            .entry(hash.to_string())
            .or_default()
            .insert(popped.clone(), value.to_string());
        Ok(Some(popped))
    }
}
