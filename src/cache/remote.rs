//! Remote Store Backend
//!
//! The cache contract over a networked key-value store. Every logical key is
//! stored under `<namespace><key>`; the namespace defaults to
//! [`DEFAULT_NAMESPACE`] and can be overridden per instance.
//!
//! Values are laid out according to the instance's [`PackMode`]; the default
//! is the tagged envelope.
//!
//! Store failures are returned as-is and never retried here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::ahead::{self, AheadStore};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::contract::{Cache, Producer};
use crate::cache::envelope::{self, CacheValue, PackMode};
use crate::cache::lock::Lock;
use crate::cache::scheduler::{Scheduler, TokioScheduler};
use crate::cache::stats::CacheStats;
use crate::cache::LOCK_DEFAULT_TTL;
use crate::config::DEFAULT_NAMESPACE;
use crate::error::{CacheError, Result};
use crate::store::RemoteStore;

/// Keys deleted per DEL command by `delete_by_pattern`.
pub const DELETE_CHUNK: usize = 400;

/// Prefix of lock tokens, inside the namespace.
const LOCK_PREFIX: &str = "lock:";

/// TTL for the store: `None` (no expiry) unless positive.
fn expiry(ttl: i64) -> Option<u64> {
    (ttl > 0).then_some(ttl as u64)
}

/// Plain string form of a hash field written without packing.
fn plain(value: &CacheValue) -> String {
    match value {
        CacheValue::Null => String::new(),
        CacheValue::Boolean(b) => String::from(if *b { "1" } else { "" }),
        CacheValue::Integer(n) => n.to_string(),
        CacheValue::Double(f) => f.to_string(),
        CacheValue::String(s) | CacheValue::Object(s) => s.clone(),
        CacheValue::List(_) | CacheValue::Map(_) => value.to_json().to_string(),
    }
}

// == Remote Cache ==
pub struct RemoteCache<S: RemoteStore> {
    store: Arc<S>,
    namespace: String,
    pack: PackMode,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    stats: Arc<Mutex<CacheStats>>,
}

impl<S: RemoteStore> Clone for RemoteCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            pack: self.pack,
            clock: self.clock.clone(),
            scheduler: self.scheduler.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<S: RemoteStore> RemoteCache<S> {
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Wraps a store that other components also hold.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
            pack: PackMode::default(),
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            stats: Arc::new(Mutex::new(CacheStats::new())),
        }
    }

    /// Uses `namespace` instead of the default key prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Lays values out as plain JSON or always-object packing instead of
    /// the tagged envelope.
    pub fn with_pack_mode(mut self, pack: PackMode) -> Self {
        self.pack = pack;
        self
    }

    pub fn pack_mode(&self) -> PackMode {
        self.pack
    }

    pub fn with_runtime(mut self, clock: Arc<dyn Clock>, scheduler: Arc<dyn Scheduler>) -> Self {
        self.clock = clock;
        self.scheduler = scheduler;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // == Key Mapping ==
    /// Physical key for a logical key.
    pub fn generate_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Logical key for a physical key.
    pub fn strip_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.namespace.as_str()).unwrap_or(key)
    }

    // == Value Layout ==
    fn pack_value(&self, value: &CacheValue) -> Result<String> {
        envelope::pack(value, None, self.pack)
    }

    /// Decodes a stored value. Stored nulls read as `None`.
    fn unpack_value(&self, raw: Option<&str>) -> Option<CacheValue> {
        envelope::unpack(raw, self.pack).filter(|v| !v.is_null())
    }

    fn unpacked(&self, raw: String, unpack: bool) -> CacheValue {
        if unpack {
            envelope::unpack(Some(raw.as_str()), self.pack).unwrap_or(CacheValue::Null)
        } else {
            CacheValue::String(raw)
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}{}{}", self.namespace, LOCK_PREFIX, key)
    }

    async fn step(&self, key: &str, ttl: Option<i64>, delta: i64, default: i64, neutral: i64) -> Result<i64> {
        let key = self.generate_key(key);
        let ttl = ttl.and_then(expiry);

        if default != neutral && self.store.set_nx(&key, &default.to_string(), ttl).await? {
            return Ok(default);
        }

        let value = self.store.incr_by(&key, delta).await?;
        if let Some(ttl) = ttl {
            self.store.expire(&key, ttl).await?;
        }
        Ok(value)
    }

    // == Pattern Reads ==
    /// Reads every key matching `pattern` in one pipelined round trip,
    /// keyed by logical key.
    pub async fn get_multiple_by_pattern(&self, pattern: &str) -> Result<HashMap<String, Option<CacheValue>>> {
        let physical = self.store.keys(&self.generate_key(pattern)).await?;
        let values = self.store.get_many(&physical).await?;

        Ok(physical
            .iter()
            .zip(values)
            .map(|(key, raw)| {
                (self.strip_key(key).to_string(), self.unpack_value(raw.as_deref()))
            })
            .collect())
    }

    // == Hash Operations ==
    /// Writes several hash fields and sets the hash's TTL. With `pack`, each
    /// field goes through the envelope so its type survives.
    pub async fn set_hash_map(
        &self,
        key: &str,
        fields: HashMap<String, CacheValue>,
        ttl: i64,
        pack: bool,
    ) -> Result<bool> {
        if fields.is_empty() {
            return Ok(true);
        }

        let mut encoded = Vec::with_capacity(fields.len());
        for (field, value) in &fields {
            let raw = if pack { self.pack_value(value)? } else { plain(value) };
            encoded.push((field.clone(), raw));
        }

        let key = self.generate_key(key);
        self.store.hset_many(&key, &encoded).await?;
        if let Some(ttl) = expiry(ttl) {
            self.store.expire(&key, ttl).await?;
        }
        Ok(true)
    }

    /// Reads a whole hash. An absent hash reads as an empty map.
    pub async fn get_hash_map(&self, key: &str, unpack: bool) -> Result<HashMap<String, CacheValue>> {
        let raw = self.store.hget_all(&self.generate_key(key)).await?;
        Ok(raw
            .into_iter()
            .map(|(field, value)| (field, self.unpacked(value, unpack)))
            .collect())
    }

    pub async fn get_hash_value(&self, key: &str, field: &str, unpack: bool) -> Result<Option<CacheValue>> {
        let mut values = self
            .store
            .hget_many(&self.generate_key(key), &[field.to_string()])
            .await?;
        Ok(values
            .pop()
            .flatten()
            .map(|raw| self.unpacked(raw, unpack))
            .filter(|v| !v.is_null()))
    }

    pub async fn get_hash_values(
        &self,
        key: &str,
        fields: &[String],
        unpack: bool,
    ) -> Result<HashMap<String, Option<CacheValue>>> {
        let values = self.store.hget_many(&self.generate_key(key), fields).await?;
        Ok(fields
            .iter()
            .cloned()
            .zip(values)
            .map(|(field, raw)| (field, raw.map(|raw| self.unpacked(raw, unpack))))
            .collect())
    }

    /// Writes one hash field. Returns true when the field is new.
    pub async fn set_hash_value(&self, key: &str, field: &str, value: &CacheValue, pack: bool) -> Result<bool> {
        let raw = if pack { self.pack_value(value)? } else { plain(value) };
        self.store.hset(&self.generate_key(key), field, &raw).await
    }

    pub async fn del_hash_value(&self, key: &str, fields: &[String]) -> Result<u64> {
        self.store.hdel(&self.generate_key(key), fields).await
    }
}

// == Cache Implementation ==
#[async_trait]
impl<S: RemoteStore> Cache for RemoteCache<S> {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let raw = self.store.get(&self.generate_key(key)).await?;
        let value = self.unpack_value(raw.as_deref());
        self.stats.lock().await.record_read(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool> {
        let payload = self.pack_value(&value)?;
        self.store
            .set(&self.generate_key(key), &payload, expiry(ttl))
            .await?;
        Ok(true)
    }

    async fn set_nx(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool> {
        let payload = self.pack_value(&value)?;
        self.store
            .set_nx(&self.generate_key(key), &payload, expiry(ttl))
            .await
    }

    async fn get_set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<Option<CacheValue>> {
        let key = self.generate_key(key);
        let payload = self.pack_value(&value)?;
        let previous = self.store.get_set(&key, &payload).await?;
        if let Some(ttl) = expiry(ttl) {
            self.store.expire(&key, ttl).await?;
        }
        Ok(self.unpack_value(previous.as_deref()))
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.store.exists(&self.generate_key(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.del(&[self.generate_key(key)]).await? > 0)
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<bool> {
        let physical: Vec<String> = keys.iter().map(|key| self.generate_key(key)).collect();
        Ok(self.store.del(&physical).await? > 0)
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
        let key = self.generate_key(key);
        match expiry(ttl) {
            Some(ttl) => self.store.expire(&key, ttl).await,
            None => Ok(self.store.del(&[key]).await? > 0),
        }
    }

    async fn rename(&self, src: &str, dst: &str, force: bool) -> Result<bool> {
        let (src, dst) = (self.generate_key(src), self.generate_key(dst));
        if force {
            self.store.rename(&src, &dst).await
        } else {
            self.store.rename_nx(&src, &dst).await
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let physical = self.store.keys(&self.generate_key(pattern)).await?;
        Ok(physical
            .iter()
            .map(|key| self.strip_key(key).to_string())
            .collect())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<bool> {
        let physical = self.store.keys(&self.generate_key(pattern)).await?;
        for chunk in physical.chunks(DELETE_CHUNK) {
            let removed = self.store.del(chunk).await?;
            debug!("Deleted {} keys matching {}", removed, pattern);
        }
        Ok(true)
    }

    async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, Option<CacheValue>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let physical: Vec<String> = keys.iter().map(|key| self.generate_key(key)).collect();
        let values = self.store.get_many(&physical).await?;

        let mut stats = self.stats.lock().await;
        Ok(keys
            .iter()
            .cloned()
            .zip(values)
            .map(|(key, raw)| {
                let value = self.unpack_value(raw.as_deref());
                stats.record_read(value.is_some());
                (key, value)
            })
            .collect())
    }

    async fn set_multiple(&self, values: HashMap<String, CacheValue>, ttl: i64) -> Result<bool> {
        if values.is_empty() {
            return Ok(true);
        }

        let mut entries = Vec::with_capacity(values.len());
        for (key, value) in &values {
            entries.push((self.generate_key(key), self.pack_value(value)?));
        }
        self.store.set_many(&entries, expiry(ttl)).await?;
        Ok(true)
    }

    async fn get_ahead_cache(
        &self,
        key: &str,
        ttl: i64,
        ahead_ttl: i64,
        producer: Producer,
        cache_empty: bool,
    ) -> Result<CacheValue> {
        let key = self.generate_key(key);
        ahead::read_ahead(self, &key, ttl, ahead_ttl, producer, cache_empty).await
    }

    async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }
}

// == Lock Implementation ==
#[async_trait]
impl<S: RemoteStore> Lock for RemoteCache<S> {
    async fn lock(&self, key: &str, value: &str, ttl: i64) -> Result<bool> {
        let ttl = if ttl > 0 { ttl } else { LOCK_DEFAULT_TTL };
        self.store
            .set_nx(&self.lock_key(key), value, expiry(ttl))
            .await
    }

    async fn unlock(&self, key: &str) -> Result<bool> {
        Ok(self.store.del(&[self.lock_key(key)]).await? > 0)
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        self.store.exists(&self.lock_key(key)).await
    }
}

// == Ahead Store Implementation ==
#[async_trait]
impl<S: RemoteStore> AheadStore for RemoteCache<S> {
    async fn load_raw(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }

    async fn store_raw(&self, key: &str, payload: String, ttl: i64) -> Result<bool> {
        self.store.set(key, &payload, expiry(ttl)).await?;
        Ok(true)
    }

    async fn record_refresh(&self) {
        self.stats.lock().await.record_refresh();
    }

    fn encode(&self, value: &CacheValue, ahead_time: i64) -> Result<String> {
        envelope::pack(value, Some(ahead_time), self.pack)
    }

    fn decode(&self, raw: Option<&str>) -> Option<CacheValue> {
        envelope::unpack(raw, self.pack)
    }

    fn now(&self) -> i64 {
        self.clock.now()
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::scheduler::DeferQueue;
    use crate::store::MemoryStore;

    fn cache() -> (RemoteCache<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryStore::with_clock(clock.clone());
        let cache = RemoteCache::new(store).with_runtime(clock.clone(), Arc::new(DeferQueue::new()));
        (cache, clock)
    }

    #[test]
    fn test_key_mapping() {
        let (cache, _) = cache();
        assert_eq!(cache.generate_key("user:1"), "sw_news:user:1");
        assert_eq!(cache.strip_key("sw_news:user:1"), "user:1");

        let custom = cache.clone().with_namespace("app:");
        assert_eq!(custom.generate_key("k"), "app:k");
        assert_eq!(custom.strip_key("other:k"), "other:k");
    }

    #[tokio::test]
    async fn test_values_stored_under_namespace() {
        let (cache, _) = cache();
        cache.set("k", "v".into(), 60).await.unwrap();
        assert!(cache.store().exists("sw_news:k").await.unwrap());
        assert!(!cache.store().exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_positive_ttl_never_expires() {
        let (cache, clock) = cache();
        cache.set("k", "v".into(), 0).await.unwrap();
        clock.advance(1_000_000);
        assert_eq!(cache.get("k").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn test_counter_is_raw_integer() {
        let (cache, _) = cache();
        assert_eq!(cache.incr_by("hits", Some(60), 5, 1).await.unwrap(), 5);
        assert_eq!(
            cache.store().get("sw_news:hits").await.unwrap(),
            Some("5".to_string())
        );
        assert_eq!(cache.get("hits").await.unwrap(), Some(CacheValue::Integer(5)));
    }

    #[tokio::test]
    async fn test_counter_on_enveloped_value_fails() {
        let (cache, _) = cache();
        cache.set("k", "text".into(), 60).await.unwrap();
        assert!(matches!(
            cache.incr("k", None, 1).await,
            Err(CacheError::NotInteger(_))
        ));
    }

    #[tokio::test]
    async fn test_decr_by_min_is_rejected() {
        let (cache, _) = cache();
        assert!(matches!(
            cache.decr_by("k", None, i64::MIN, -1).await,
            Err(CacheError::InvalidRequest(_))
        ));
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_json_pack_mode_stores_plain_json() {
        let (cache, _) = cache();
        let cache = cache.with_pack_mode(PackMode::Json);
        let value = CacheValue::from_json(serde_json::json!({"title": "hi", "tags": ["a"]}));

        cache.set("post", value.clone(), 60).await.unwrap();
        assert_eq!(
            cache.store().get("sw_news:post").await.unwrap(),
            Some(r#"{"title":"hi","tags":["a"]}"#.to_string())
        );
        assert_eq!(cache.get("post").await.unwrap(), Some(value));

        cache.set("name", "ada".into(), 60).await.unwrap();
        assert_eq!(cache.get("name").await.unwrap(), Some("ada".into()));
    }

    #[tokio::test]
    async fn test_object_pack_mode_round_trips() {
        let (cache, _) = cache();
        let cache = cache.with_pack_mode(PackMode::Object);
        assert_eq!(cache.pack_mode(), PackMode::Object);

        cache.set("n", CacheValue::Integer(3), 60).await.unwrap();
        let raw = cache.store().get("sw_news:n").await.unwrap().unwrap();
        assert!(raw.contains(r#""origindata_type":"object""#));
        assert_eq!(cache.get("n").await.unwrap(), Some(CacheValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_deferred_refresh_stamps_request_time() {
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = Arc::new(DeferQueue::new());
        let cache = RemoteCache::new(MemoryStore::with_clock(clock.clone()))
            .with_runtime(clock.clone(), queue.clone());
        let make = crate::cache::contract::producer(|| async { Ok(CacheValue::from("v")) });

        cache.get_ahead_cache("feed", 60, 5, make.clone(), false).await.unwrap();
        clock.advance(6);
        cache.get_ahead_cache("feed", 60, 5, make, false).await.unwrap();
        assert_eq!(queue.pending(), 1);

        clock.advance(10);
        queue.drain().await;
        let raw = cache.store().get("sw_news:feed").await.unwrap();
        assert_eq!(envelope::ahead_time(raw.as_deref()), 1_011);
    }

    #[tokio::test]
    async fn test_lock_keys_are_namespaced_once() {
        let (cache, _) = cache();
        assert!(cache.lock("job", "1", 0).await.unwrap());
        assert!(cache.store().exists("sw_news:lock:job").await.unwrap());
        assert_eq!(cache.store().ttl("sw_news:lock:job").await, Some(LOCK_DEFAULT_TTL));
        assert!(cache.is_locked("job").await.unwrap());

        assert!(cache.unlock("job").await.unwrap());
        assert!(!cache.is_locked("job").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_set_reapplies_ttl() {
        let (cache, clock) = cache();
        assert_eq!(cache.get_set("k", "a".into(), 10).await.unwrap(), None);
        assert_eq!(cache.get_set("k", "b".into(), 10).await.unwrap(), Some("a".into()));

        clock.advance(10);
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_zero_deletes() {
        let (cache, _) = cache();
        cache.set("k", "v".into(), 60).await.unwrap();
        assert!(cache.expire("k", 0).await.unwrap());
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_pattern_in_chunks() {
        let (cache, _) = cache();
        let values: HashMap<String, CacheValue> = (0..(DELETE_CHUNK + 50))
            .map(|i| (format!("bulk_{}", i), CacheValue::Integer(i as i64)))
            .collect();
        cache.set_multiple(values, 60).await.unwrap();
        cache.set("keep", "v".into(), 60).await.unwrap();

        assert!(cache.delete_by_pattern("bulk_*").await.unwrap());
        assert!(cache.keys("bulk_*").await.unwrap().is_empty());
        assert_eq!(cache.keys("*").await.unwrap(), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn test_get_multiple_by_pattern() {
        let (cache, _) = cache();
        cache.set("user_1", "a".into(), 60).await.unwrap();
        cache.set("user_2", 2i64.into(), 60).await.unwrap();
        cache.set("u_123", "c".into(), 60).await.unwrap();

        let found = cache.get_multiple_by_pattern("user*").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["user_1"], Some("a".into()));
        assert_eq!(found["user_2"], Some(CacheValue::Integer(2)));
    }

    #[tokio::test]
    async fn test_hash_map_pack_round_trip() {
        let (cache, clock) = cache();
        let mut fields = HashMap::new();
        fields.insert("count".to_string(), CacheValue::Integer(3));
        fields.insert("flag".to_string(), CacheValue::Boolean(true));
        assert!(cache.set_hash_map("h", fields, 30, true).await.unwrap());

        let packed = cache.get_hash_map("h", true).await.unwrap();
        assert_eq!(packed["count"], CacheValue::Integer(3));
        assert_eq!(packed["flag"], CacheValue::Boolean(true));

        let raw = cache.get_hash_value("h", "count", false).await.unwrap().unwrap();
        assert!(matches!(raw, CacheValue::String(ref s) if s.contains("origindata_type")));

        clock.advance(30);
        assert!(cache.get_hash_map("h", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hash_fields_without_pack() {
        let (cache, _) = cache();
        assert!(cache
            .set_hash_value("h", "name", &"ada".into(), false)
            .await
            .unwrap());
        cache
            .set_hash_value("h", "age", &CacheValue::Integer(36), false)
            .await
            .unwrap();

        let values = cache
            .get_hash_values("h", &["name".to_string(), "age".to_string(), "nope".to_string()], true)
            .await
            .unwrap();
        assert_eq!(values["name"], Some("ada".into()));
        assert_eq!(values["age"], Some(CacheValue::Integer(36)));
        assert_eq!(values["nope"], None);

        assert_eq!(cache.del_hash_value("h", &["name".to_string()]).await.unwrap(), 1);
        assert_eq!(cache.get_hash_value("h", "name", true).await.unwrap(), None);
    }
}
