//! Tiered Cache
//!
//! The local table in front of the remote store. Reads try the local table
//! first and fall back to the remote store, copying remote hits into the local
//! table. Writes go through to both tiers.
//!
//! The remote store is authoritative: counters, conditional writes, renames,
//! locks and ahead-of-expiry reads run against it alone, and the local copy of
//! any key they touch is dropped or replaced.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::contract::{Cache, Producer};
use crate::cache::envelope::CacheValue;
use crate::cache::local::LocalTableCache;
use crate::cache::lock::Lock;
use crate::cache::remote::RemoteCache;
use crate::cache::stats::CacheStats;
use crate::error::Result;
use crate::store::RemoteStore;

// == Tiered Cache ==
pub struct TieredCache<S: RemoteStore> {
    near: LocalTableCache,
    far: RemoteCache<S>,
    /// TTL for local copies of remote hits; `<= 0` uses the table default
    fill_ttl: i64,
    stats: Arc<Mutex<CacheStats>>,
}

impl<S: RemoteStore> Clone for TieredCache<S> {
    fn clone(&self) -> Self {
        Self {
            near: self.near.clone(),
            far: self.far.clone(),
            fill_ttl: self.fill_ttl,
            stats: self.stats.clone(),
        }
    }
}

impl<S: RemoteStore> TieredCache<S> {
    pub fn new(near: LocalTableCache, far: RemoteCache<S>) -> Self {
        Self {
            near,
            far,
            fill_ttl: 0,
            stats: Arc::new(Mutex::new(CacheStats::new())),
        }
    }

    /// Sets the TTL of local copies made when a read falls through.
    pub fn with_fill_ttl(mut self, ttl: i64) -> Self {
        self.fill_ttl = ttl;
        self
    }

    pub fn near(&self) -> &LocalTableCache {
        &self.near
    }

    pub fn far(&self) -> &RemoteCache<S> {
        &self.far
    }

    /// Copies a value into the local table. A value the table cannot hold
    /// must not leave an older copy behind.
    async fn fill(&self, key: &str, value: CacheValue, ttl: i64) -> Result<()> {
        if !self.near.set(key, value, ttl).await? {
            debug!("Local tier cannot hold {}, dropping its copy", key);
            self.near.delete(key).await?;
        }
        Ok(())
    }
}

// == Cache Implementation ==
#[async_trait]
impl<S: RemoteStore> Cache for TieredCache<S> {
    fn name(&self) -> &'static str {
        "tiered"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut value = self.near.get(key).await?;
        if value.is_none() {
            value = self.far.get(key).await?;
            if let Some(found) = &value {
                self.fill(key, found.clone(), self.fill_ttl).await?;
            }
        }

        self.stats.lock().await.record_read(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool> {
        let stored = self.far.set(key, value.clone(), ttl).await?;
        self.fill(key, value, ttl).await?;
        Ok(stored)
    }

    async fn set_nx(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool> {
        if !self.far.set_nx(key, value.clone(), ttl).await? {
            return Ok(false);
        }
        self.fill(key, value, ttl).await?;
        Ok(true)
    }

    async fn get_set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<Option<CacheValue>> {
        let previous = self.far.get_set(key, value.clone(), ttl).await?;
        self.fill(key, value, ttl).await?;
        Ok(previous)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.near.has(key).await? || self.far.has(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let near = self.near.delete(key).await?;
        let far = self.far.delete(key).await?;
        Ok(near || far)
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<bool> {
        let near = self.near.delete_multiple(keys).await?;
        let far = self.far.delete_multiple(keys).await?;
        Ok(near || far)
    }

    async fn incr_by(&self, key: &str, ttl: Option<i64>, amount: i64, default: i64) -> Result<i64> {
        let value = self.far.incr_by(key, ttl, amount, default).await?;
        self.near.delete(key).await?;
        Ok(value)
    }

    async fn decr_by(&self, key: &str, ttl: Option<i64>, amount: i64, default: i64) -> Result<i64> {
        let value = self.far.decr_by(key, ttl, amount, default).await?;
        self.near.delete(key).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: i64) -> Result<bool> {
        let updated = self.far.expire(key, ttl).await?;
        if !updated || ttl <= 0 {
            self.near.delete(key).await?;
        } else {
            self.near.expire(key, ttl).await?;
        }
        Ok(updated)
    }

    async fn rename(&self, src: &str, dst: &str, force: bool) -> Result<bool> {
        let renamed = self.far.rename(src, dst, force).await?;
        if renamed {
            self.near.delete_multiple(&[src.to_string(), dst.to_string()]).await?;
        }
        Ok(renamed)
    }

    /// Lists remote keys only; local rows are copies of them.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.far.keys(pattern).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<bool> {
        self.near.delete_by_pattern(pattern).await?;
        self.far.delete_by_pattern(pattern).await
    }

    async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, Option<CacheValue>>> {
        let mut values = self.near.get_multiple(keys).await?;
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| values.get(*key).map(Option::is_none).unwrap_or(true))
            .cloned()
            .collect();

        if !missing.is_empty() {
            for (key, value) in self.far.get_multiple(&missing).await? {
                if let Some(found) = &value {
                    self.fill(&key, found.clone(), self.fill_ttl).await?;
                }
                values.insert(key, value);
            }
        }

        let mut stats = self.stats.lock().await;
        for key in keys {
            stats.record_read(values.get(key).map(Option::is_some).unwrap_or(false));
        }
        Ok(values)
    }

    async fn set_multiple(&self, values: HashMap<String, CacheValue>, ttl: i64) -> Result<bool> {
        let stored = self.far.set_multiple(values.clone(), ttl).await?;
        for (key, value) in values {
            self.fill(&key, value, ttl).await?;
        }
        Ok(stored)
    }

    /// Runs against the remote store, where the ahead marker is shared by
    /// every worker.
    async fn get_ahead_cache(
        &self,
        key: &str,
        ttl: i64,
        ahead_ttl: i64,
        producer: Producer,
        cache_empty: bool,
    ) -> Result<CacheValue> {
        self.far
            .get_ahead_cache(key, ttl, ahead_ttl, producer, cache_empty)
            .await
    }

    /// Reads as seen by callers, with the local table's housekeeping counters
    /// and entry count and the remote store's refresh count.
    async fn stats(&self) -> CacheStats {
        let near = self.near.stats().await;
        let far = self.far.stats().await;

        let mut stats = self.stats.lock().await.clone();
        stats.evictions = near.evictions;
        stats.expirations = near.expirations;
        stats.cold_evictions = near.cold_evictions;
        stats.refreshes = far.refreshes;
        stats.set_total_entries(near.total_entries);
        stats
    }
}

// == Lock Implementation ==
/// Locks live in the remote store so every worker sees them.
#[async_trait]
impl<S: RemoteStore> Lock for TieredCache<S> {
    async fn lock(&self, key: &str, value: &str, ttl: i64) -> Result<bool> {
        self.far.lock(key, value, ttl).await
    }

    async fn unlock(&self, key: &str) -> Result<bool> {
        self.far.unlock(key).await
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        self.far.is_locked(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::scheduler::DeferQueue;
    use crate::config::LocalTableConfig;
    use crate::store::MemoryStore;

    fn tiered_with(config: LocalTableConfig) -> (TieredCache<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = Arc::new(DeferQueue::new());
        let near = LocalTableCache::with_runtime(config, clock.clone(), queue.clone());
        let far = RemoteCache::new(MemoryStore::with_clock(clock.clone()))
            .with_runtime(clock.clone(), queue);
        (TieredCache::new(near, far), clock)
    }

    fn tiered() -> (TieredCache<MemoryStore>, Arc<ManualClock>) {
        tiered_with(LocalTableConfig::default())
    }

    #[tokio::test]
    async fn test_set_writes_both_tiers() {
        let (cache, _) = tiered();
        assert!(cache.set("user:1", "ada".into(), 60).await.unwrap());

        assert_eq!(cache.near().get("user:1").await.unwrap(), Some("ada".into()));
        assert_eq!(cache.far().get("user:1").await.unwrap(), Some("ada".into()));
    }

    #[tokio::test]
    async fn test_get_falls_back_and_fills_local() {
        let (cache, _) = tiered();
        cache.far().set("post:1", CacheValue::Integer(7), 60).await.unwrap();
        assert!(!cache.near().has("post:1").await.unwrap());

        assert_eq!(cache.get("post:1").await.unwrap(), Some(CacheValue::Integer(7)));
        assert_eq!(cache.near().get("post:1").await.unwrap(), Some(CacheValue::Integer(7)));
    }

    #[tokio::test]
    async fn test_local_copy_is_served_first() {
        let (cache, _) = tiered();
        cache.set("k", "v1".into(), 60).await.unwrap();
        // a remote-only change is not seen until the local copy goes
        cache.far().set("k", "v2".into(), 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v1".into()));

        cache.near().delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v2".into()));
    }

    #[tokio::test]
    async fn test_fill_ttl() {
        let (cache, clock) = tiered();
        let cache = cache.with_fill_ttl(5);
        cache.far().set("k", "v".into(), 0).await.unwrap();
        cache.get("k").await.unwrap();

        clock.advance(5);
        assert!(!cache.near().has("k").await.unwrap());
        assert!(cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_value_too_wide_for_local_stays_remote() {
        let (cache, _) = tiered_with(LocalTableConfig {
            shard_content_width: 128,
            ..LocalTableConfig::default()
        });
        cache.set("k", "small".into(), 60).await.unwrap();

        let big = CacheValue::from("x".repeat(200));
        assert!(cache.set("k", big.clone(), 60).await.unwrap());
        assert!(!cache.near().has("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(big));
    }

    #[tokio::test]
    async fn test_counters_run_remotely_and_drop_local_copy() {
        let (cache, _) = tiered();
        cache.set("hits", CacheValue::Integer(10), 60).await.unwrap();

        assert_eq!(cache.incr_by("hits", Some(60), 5, 1).await.unwrap(), 15);
        assert!(!cache.near().has("hits").await.unwrap());
        assert_eq!(cache.get("hits").await.unwrap(), Some(CacheValue::Integer(15)));

        assert_eq!(cache.decr("hits", None, -1).await.unwrap(), 14);
        assert_eq!(cache.get("hits").await.unwrap(), Some(CacheValue::Integer(14)));
    }

    #[tokio::test]
    async fn test_set_nx_and_rename_follow_remote() {
        let (cache, _) = tiered();
        cache.far().set("taken", "remote".into(), 60).await.unwrap();
        assert!(!cache.set_nx("taken", "mine".into(), 60).await.unwrap());
        assert!(!cache.near().has("taken").await.unwrap());

        cache.set("a", CacheValue::Integer(1), 60).await.unwrap();
        assert!(cache.rename("a", "b", false).await.unwrap());
        assert!(!cache.has("a").await.unwrap());
        assert_eq!(cache.get("b").await.unwrap(), Some(CacheValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_delete_and_expire_clear_both_tiers() {
        let (cache, _) = tiered();
        cache.set("k", "v".into(), 60).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.has("k").await.unwrap());

        cache.set("k", "v".into(), 60).await.unwrap();
        assert!(cache.expire("k", 0).await.unwrap());
        assert!(!cache.near().has("k").await.unwrap());
        assert!(!cache.far().has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_multiple_mixes_tiers() {
        let (cache, _) = tiered();
        cache.set("near", "n".into(), 60).await.unwrap();
        cache.far().set("far", "f".into(), 60).await.unwrap();

        let keys = vec!["near".to_string(), "far".to_string(), "none".to_string()];
        let values = cache.get_multiple(&keys).await.unwrap();
        assert_eq!(values["near"], Some("n".into()));
        assert_eq!(values["far"], Some("f".into()));
        assert_eq!(values["none"], None);
        assert!(cache.near().has("far").await.unwrap());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_locks_are_remote() {
        let (cache, _) = tiered();
        assert!(cache.lock("job", "1", 10).await.unwrap());
        assert!(cache.far().is_locked("job").await.unwrap());
        assert!(!cache.near().is_locked("job").await.unwrap());
        assert!(cache.unlock("job").await.unwrap());
    }
}
