//! Local Table Backend
//!
//! The cache contract over in-process shared tables. Keys are partitioned
//! into shards by the text before their first `:`; each shard has a fixed
//! row count and payload width. Every write registers the key with an
//! eviction timer, which drives both expiry sweeps and capacity eviction.
//!
//! # Differences from the remote backend
//! - `ttl <= 0` means [`LocalTableConfig::default_ttl`], never "forever"
//! - every successful read bumps the row's usage counter, which the cold
//!   sweep uses to drop rarely read rows
//! - `rename` is unsupported and always returns `false`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use md5::{Digest, Md5};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::ahead::{self, AheadStore};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::contract::{Cache, Producer};
use crate::cache::envelope::{self, CacheValue};
use crate::cache::lock::Lock;
use crate::cache::pattern::glob_match;
use crate::cache::scheduler::{Scheduler, TokioScheduler};
use crate::cache::stats::CacheStats;
use crate::cache::table::{Insert, Row, SharedTable, KEY_WIDTH};
use crate::cache::timer::EvictionTimer;
use crate::config::LocalTableConfig;
use crate::error::{CacheError, Result};

/// Shard for keys without a `prefix:`.
pub const COMMON_SHARD: &str = "common_table";

/// Shard holding lock tokens.
pub const LOCK_SHARD: &str = "lock";

/// Timer entries evicted per round of a full-shard write.
const EVICT_PER_ROUND: usize = 2;

/// Schedule entries of other shards passed over per round before falling
/// back to the least-used row.
const EVICT_SCAN_LIMIT: usize = 64;

// == Key Helpers ==
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Maps a cache key onto the row-key column.
///
/// Keys that fit are kept verbatim. Longer keys keep their `prefix:` (so they
/// stay in the same shard) and replace the rest with its MD5 digest.
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if key.len() <= KEY_WIDTH {
        return key.to_string();
    }
    match key.find(':') {
        Some(pos) if pos > 0 => format!("{}{}", &key[..=pos], md5_hex(&key[pos + 1..])),
        _ => md5_hex(key),
    }
}

/// Shard a key lives in.
pub fn shard_name(key: &str) -> &str {
    match key.find(':') {
        Some(pos) if pos > 0 => &key[..pos],
        _ => COMMON_SHARD,
    }
}

fn lock_key(key: &str) -> String {
    format!("{}:{}", LOCK_SHARD, md5_hex(key))
}

// == Local Table Cache ==
/// Cheap to clone; clones share the same shards and timers.
#[derive(Clone)]
pub struct LocalTableCache {
    inner: Arc<Inner>,
}

struct Inner {
    shards: DashMap<String, Arc<SharedTable>>,
    /// Expiry schedule of every row outside the lock shard
    timer: Mutex<EvictionTimer>,
    /// Expiry schedule of the lock shard, never used for capacity eviction
    lock_timer: Mutex<EvictionTimer>,
    stats: Mutex<CacheStats>,
    config: LocalTableConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
}

impl LocalTableCache {
    pub fn new(config: LocalTableConfig) -> Self {
        Self::with_runtime(config, Arc::new(SystemClock), Arc::new(TokioScheduler))
    }

    /// Builds a cache on an explicit clock and deferred-task scheduler.
    pub fn with_runtime(
        config: LocalTableConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let cache = Self {
            inner: Arc::new(Inner {
                shards: DashMap::new(),
                timer: Mutex::new(EvictionTimer::new()),
                lock_timer: Mutex::new(EvictionTimer::new()),
                stats: Mutex::new(CacheStats::new()),
                config,
                clock,
                scheduler,
            }),
        };
        let config = &cache.inner.config;
        cache.get_or_create_shard(COMMON_SHARD, config.shard_rows, config.shard_content_width);
        cache.get_or_create_shard(LOCK_SHARD, config.lock_shard_rows, config.lock_shard_width);
        cache
    }

    pub fn config(&self) -> &LocalTableConfig {
        &self.inner.config
    }

    fn effective_ttl(&self, ttl: i64) -> i64 {
        if ttl > 0 {
            ttl
        } else {
            self.inner.config.default_ttl
        }
    }

    // == Shard Management ==
    /// Returns the named shard, creating it with the given sizing if needed.
    pub fn get_or_create_shard(&self, name: &str, rows: usize, width: usize) -> Arc<SharedTable> {
        self.inner
            .shards
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating shard {} ({} rows, {} bytes per row)", name, rows, width);
                Arc::new(SharedTable::new(name, rows, width))
            })
            .value()
            .clone()
    }

    pub fn shard(&self, name: &str) -> Option<Arc<SharedTable>> {
        self.inner.shards.get(name).map(|shard| shard.value().clone())
    }

    pub fn shard_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.shards.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Removes a shard and every row in it.
    pub async fn drop_shard(&self, name: &str) -> bool {
        let Some((_, shard)) = self.inner.shards.remove(name) else {
            return false;
        };
        let mut timer = self.timer_for(name).lock().await;
        for row in shard.rows() {
            timer.cancel(&row.cache_key);
        }
        info!("Dropped shard {} ({} rows)", name, shard.len());
        true
    }

    /// Empties every shard and both schedules. Shards stay registered.
    pub async fn clear(&self) {
        for shard in self.shards() {
            shard.clear();
        }
        self.inner.timer.lock().await.clear();
        self.inner.lock_timer.lock().await.clear();
    }

    /// Total rows across all shards.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shards(&self) -> Vec<Arc<SharedTable>> {
        self.inner.shards.iter().map(|e| e.value().clone()).collect()
    }

    /// Shard a normalized key lives in, created with the configured sizing.
    fn shard_for(&self, key: &str) -> Arc<SharedTable> {
        let name = shard_name(key);
        let config = &self.inner.config;
        if name == LOCK_SHARD {
            self.get_or_create_shard(name, config.lock_shard_rows, config.lock_shard_width)
        } else {
            self.get_or_create_shard(name, config.shard_rows, config.shard_content_width)
        }
    }

    fn timer_for(&self, shard: &str) -> &Mutex<EvictionTimer> {
        if shard == LOCK_SHARD {
            &self.inner.lock_timer
        } else {
            &self.inner.timer
        }
    }

    // == Row Access ==
    /// Reads a row, dropping it if it has expired.
    async fn live_row(&self, shard: &SharedTable, key: &str, now: i64) -> Option<Row> {
        let row = shard.get(key)?;
        if !row.is_expired(now) {
            return Some(row);
        }

        if shard.del_expired(key, now) {
            let mut timer = self.timer_for(shard.name()).lock().await;
            if timer.deadline(key).map(|at| at <= now).unwrap_or(false) {
                timer.cancel(key);
            }
        }
        None
    }

    async fn remove(&self, key: &str) -> bool {
        let name = shard_name(key);
        let removed = self.shard(name).map(|shard| shard.del(key)).unwrap_or(false);
        if removed {
            self.timer_for(name).lock().await.cancel(key);
        }
        removed
    }

    // == Write Path ==
    /// Runs `attempt` against `shard`, evicting and retrying while the shard
    /// is full. Gives up after `max_eviction_rounds` or once nothing is left
    /// to evict. A stored row is scheduled to expire at `now + ttl`.
    async fn store_row<F>(&self, shard: &SharedTable, key: &str, ttl: i64, now: i64, mut attempt: F) -> Insert
    where
        F: FnMut(&SharedTable) -> Insert + Send,
    {
        for _ in 0..=self.inner.config.max_eviction_rounds {
            match attempt(shard) {
                Insert::Stored => {
                    self.timer_for(shard.name()).lock().await.schedule(key, ttl, now);
                    return Insert::Stored;
                }
                Insert::Full => {
                    if !self.evict(shard, now).await {
                        break;
                    }
                }
                outcome => return outcome,
            }
        }

        warn!("Shard {} is still full, dropping write of {}", shard.name(), key);
        Insert::Full
    }

    /// Writes an encoded payload under a normalized key.
    async fn write(&self, key: &str, payload: &str, ttl: i64) -> Insert {
        let shard = self.shard_for(key);
        if !shard.fits(payload) {
            debug!(
                "Payload for {} is {} bytes, shard {} holds at most {}",
                key,
                payload.len(),
                shard.name(),
                shard.content_width()
            );
            return Insert::TooWide;
        }

        let now = self.now();
        let expire_at = now.saturating_add(ttl);
        self.store_row(&shard, key, ttl, now, |s| s.set(key, payload, expire_at))
            .await
    }

    // == Eviction ==
    /// Frees room for a write into `target`. Returns false when nothing
    /// could be evicted.
    ///
    /// Ordinary shards give up the entries nearest to expiry, falling back
    /// to the least-used row of `target` once the schedule is empty. The lock
    /// shard only gives up tokens that have already expired.
    async fn evict(&self, target: &SharedTable, now: i64) -> bool {
        if target.name() == LOCK_SHARD {
            let expired = self.inner.lock_timer.lock().await.pop_expired(now);
            for entry in &expired {
                target.del_expired(&entry.key, now);
            }
            return !expired.is_empty();
        }

        // Entries of other shards free nothing here unless already dead;
        // they go back on the schedule.
        let popped: Vec<_> = {
            let mut timer = self.inner.timer.lock().await;
            let mut victims = Vec::new();
            let mut skipped = Vec::new();
            while victims.len() < EVICT_PER_ROUND && skipped.len() < EVICT_SCAN_LIMIT {
                let Some(entry) = timer.pop() else {
                    break;
                };
                if entry.expires_at <= now || shard_name(&entry.key) == target.name() {
                    victims.push(entry);
                } else {
                    skipped.push(entry);
                }
            }
            for entry in skipped {
                timer.schedule_at(&entry.key, entry.expires_at, now);
            }
            victims
        };

        let mut evicted = 0;
        for entry in &popped {
            if let Some(shard) = self.shard(shard_name(&entry.key)) {
                if shard.del(&entry.key) {
                    debug!("Evicted {} (expiring at {})", entry.key, entry.expires_at);
                    evicted += 1;
                }
            }
        }

        let mut progressed = !popped.is_empty();
        if !progressed {
            if let Some(key) = target.least_used() {
                if target.del(&key) {
                    debug!("Evicted least used row {} from {}", key, target.name());
                    evicted += 1;
                    progressed = true;
                }
            }
        }

        self.inner.stats.lock().await.record_evictions(evicted);
        progressed
    }

    // == Maintenance ==
    /// Runs [`LocalTableCache::clear_expired`] at the cache clock's current time.
    pub async fn sweep_expired(&self) -> Vec<String> {
        self.clear_expired(self.inner.clock.now()).await
    }

    /// Deletes every row whose scheduled expiry is at or before `now`.
    /// Returns the deleted keys.
    pub async fn clear_expired(&self, now: i64) -> Vec<String> {
        let mut expired = Vec::new();
        for timer in [&self.inner.timer, &self.inner.lock_timer] {
            let entries = timer.lock().await.pop_expired(now);
            for entry in entries {
                if let Some(shard) = self.shard(shard_name(&entry.key)) {
                    shard.del_expired(&entry.key, now);
                }
                expired.push(entry.key);
            }
        }

        if !expired.is_empty() {
            debug!("Expired {} entries", expired.len());
            self.inner.stats.lock().await.record_expirations(expired.len());
        }
        expired
    }

    /// Deletes every row read fewer than `cold_threshold` times. Lock tokens
    /// are left alone. Returns the deleted keys.
    pub async fn clear_cold(&self) -> Vec<String> {
        let threshold = self.inner.config.cold_threshold;
        let mut cold = Vec::new();
        for shard in self.shards() {
            if shard.name() == LOCK_SHARD {
                continue;
            }
            for row in shard.rows() {
                if row.use_num < threshold && shard.del(&row.cache_key) {
                    cold.push(row.cache_key);
                }
            }
        }

        if !cold.is_empty() {
            let mut timer = self.inner.timer.lock().await;
            for key in &cold {
                timer.cancel(key);
            }
            drop(timer);
            info!("Cold sweep removed {} entries", cold.len());
            self.inner.stats.lock().await.record_cold_evictions(cold.len());
        }
        cold
    }

    // == Counters ==
    async fn step(&self, key: &str, ttl: Option<i64>, delta: i64, default: i64, neutral: i64) -> Result<i64> {
        let key = normalize_key(key);
        let ttl = ttl.filter(|t| *t > 0).unwrap_or(self.inner.config.default_ttl);
        let shard = self.shard_for(&key);
        let now = self.now();
        let expire_at = now.saturating_add(ttl);

        // drops an expired row so it is never stepped
        let live = self.live_row(&shard, &key, now).await.is_some();
        if default != neutral && !live {
            let seed = default.to_string();
            match self
                .store_row(&shard, &key, ttl, now, |s| s.insert_new(&key, &seed, expire_at))
                .await
            {
                Insert::Stored => return Ok(default),
                // another writer created it first; step theirs
                Insert::Occupied => {}
                _ => return Err(CacheError::Capacity(key)),
            }
        }

        let mut value = None;
        let mut failure = None;
        let outcome = self
            .store_row(&shard, &key, ttl, now, |s| match s.incr_content(&key, delta, expire_at) {
                Ok(Some(next)) => {
                    value = Some(next);
                    Insert::Stored
                }
                Ok(None) => Insert::Full,
                Err(err) => {
                    failure = Some(err);
                    Insert::TooWide
                }
            })
            .await;

        if let Some(err) = failure {
            return Err(err);
        }
        match (outcome, value) {
            (Insert::Stored, Some(value)) => Ok(value),
            _ => Err(CacheError::Capacity(key)),
        }
    }
}

// == Cache Implementation ==
#[async_trait]
impl Cache for LocalTableCache {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let key = normalize_key(key);
        let now = self.now();

        let mut value = None;
        if let Some(shard) = self.shard(shard_name(&key)) {
            if let Some(row) = self.live_row(&shard, &key, now).await {
                shard.incr_use(&key);
                value = envelope::deserialize(Some(row.content.as_str())).filter(|v| !v.is_null());
            }
        }

        self.inner.stats.lock().await.record_read(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool> {
        let key = normalize_key(key);
        let payload = envelope::serialize(&value, None)?;
        Ok(self.write(&key, &payload, self.effective_ttl(ttl)).await == Insert::Stored)
    }

    async fn set_nx(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool> {
        let key = normalize_key(key);
        let ttl = self.effective_ttl(ttl);
        let payload = envelope::serialize(&value, None)?;
        let shard = self.shard_for(&key);
        if !shard.fits(&payload) {
            return Ok(false);
        }

        let now = self.now();
        // an expired row must not block the insert
        self.live_row(&shard, &key, now).await;
        let outcome = self
            .store_row(&shard, &key, ttl, now, |s| {
                s.insert_new(&key, &payload, now.saturating_add(ttl))
            })
            .await;
        Ok(outcome == Insert::Stored)
    }

    /// Fails with [`CacheError::Capacity`] when the new value cannot be
    /// stored; the old row then stays in place.
    async fn get_set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<Option<CacheValue>> {
        let key = normalize_key(key);
        let shard = self.shard_for(&key);
        let previous = self.live_row(&shard, &key, self.now()).await;

        let payload = envelope::serialize(&value, None)?;
        if self.write(&key, &payload, self.effective_ttl(ttl)).await != Insert::Stored {
            warn!("get_set could not store a new value for {}", key);
            return Err(CacheError::Capacity(key));
        }

        Ok(previous
            .and_then(|row| envelope::deserialize(Some(row.content.as_str())))
            .filter(|v| !v.is_null()))
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let key = normalize_key(key);
        match self.shard(shard_name(&key)) {
            Some(shard) => Ok(self.live_row(&shard, &key, self.now()).await.is_some()),
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove(&normalize_key(key)).await)
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<bool> {
        let mut removed = false;
        for key in keys {
            removed |= self.remove(&normalize_key(key)).await;
        }
        Ok(removed)
    }

    async fn incr_by(&self, key: &str, ttl: Option<i64>, amount: i64, default: i64) -> Result<i64> {
        self.step(key, ttl, amount, default, 1).await
    }

    async fn decr_by(&self, key: &str, ttl: Option<i64>, amount: i64, default: i64) -> Result<i64> {
        let delta = amount
            .checked_neg()
            .ok_or_else(|| CacheError::InvalidRequest(format!("cannot decrement by {}", amount)))?;
        self.step(key, ttl, delta, default, -1).await
    }

    async fn expire(&self, key: &str, ttl: i64) -> Result<bool> {
        let key = normalize_key(key);
        if ttl <= 0 {
            return Ok(self.remove(&key).await);
        }

        let Some(shard) = self.shard(shard_name(&key)) else {
            return Ok(false);
        };
        let now = self.now();
        if self.live_row(&shard, &key, now).await.is_none() || !shard.set_expire_at(&key, now.saturating_add(ttl)) {
            return Ok(false);
        }
        self.timer_for(shard.name()).lock().await.schedule(&key, ttl, now);
        Ok(true)
    }

    async fn rename(&self, src: &str, dst: &str, _force: bool) -> Result<bool> {
        debug!("Rename {} -> {} is not supported by the local table", src, dst);
        Ok(false)
    }

    /// Matches against stored row keys, so keys longer than the row-key
    /// column are seen in their hashed form.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.now();
        let mut keys: Vec<String> = self
            .shards()
            .iter()
            .filter(|shard| shard.name() != LOCK_SHARD)
            .flat_map(|shard| shard.rows())
            .filter(|row| !row.is_expired(now) && glob_match(pattern, &row.cache_key))
            .map(|row| row.cache_key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<bool> {
        for key in self.keys(pattern).await? {
            self.remove(&key).await;
        }
        Ok(true)
    }

    async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, Option<CacheValue>>> {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            values.insert(key.clone(), self.get(key).await?);
        }
        Ok(values)
    }

    async fn set_multiple(&self, values: HashMap<String, CacheValue>, ttl: i64) -> Result<bool> {
        let mut stored = true;
        for (key, value) in values {
            stored &= self.set(&key, value, ttl).await?;
        }
        Ok(stored)
    }

    async fn get_ahead_cache(
        &self,
        key: &str,
        ttl: i64,
        ahead_ttl: i64,
        producer: Producer,
        cache_empty: bool,
    ) -> Result<CacheValue> {
        let key = normalize_key(key);
        let ttl = self.effective_ttl(ttl);
        ahead::read_ahead(self, &key, ttl, ahead_ttl, producer, cache_empty).await
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.lock().await.clone();
        stats.set_total_entries(self.len());
        stats
    }
}

// == Lock Implementation ==
#[async_trait]
impl Lock for LocalTableCache {
    async fn lock(&self, key: &str, value: &str, ttl: i64) -> Result<bool> {
        let ttl = if ttl > 0 { ttl } else { self.inner.config.lock_ttl };
        let key = lock_key(key);
        let shard = self.shard_for(&key);
        if !shard.fits(value) {
            return Err(CacheError::InvalidRequest(format!(
                "lock value is wider than {} bytes",
                shard.content_width()
            )));
        }

        let now = self.now();
        self.live_row(&shard, &key, now).await;
        let outcome = self
            .store_row(&shard, &key, ttl, now, |s| {
                s.insert_new(&key, value, now.saturating_add(ttl))
            })
            .await;
        Ok(outcome == Insert::Stored)
    }

    async fn unlock(&self, key: &str) -> Result<bool> {
        Ok(self.remove(&lock_key(key)).await)
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let key = lock_key(key);
        match self.shard(LOCK_SHARD) {
            Some(shard) => Ok(self.live_row(&shard, &key, self.now()).await.is_some()),
            None => Ok(false),
        }
    }
}

// == Ahead Store Implementation ==
#[async_trait]
impl AheadStore for LocalTableCache {
    async fn load_raw(&self, key: &str) -> Result<Option<String>> {
        match self.shard(shard_name(key)) {
            Some(shard) => Ok(self
                .live_row(&shard, key, self.now())
                .await
                .map(|row| row.content)),
            None => Ok(None),
        }
    }

    async fn store_raw(&self, key: &str, payload: String, ttl: i64) -> Result<bool> {
        Ok(self.write(key, &payload, self.effective_ttl(ttl)).await == Insert::Stored)
    }

    async fn record_refresh(&self) {
        self.inner.stats.lock().await.record_refresh();
    }

    fn now(&self) -> i64 {
        self.inner.clock.now()
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.inner.scheduler.clone()
    }
}
