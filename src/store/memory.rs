//! In-process remote store.
//!
//! Mirrors the command semantics of the redis store closely enough for the
//! remote cache backend to run against it: per-key TTLs, SET clearing a TTL,
//! INCRBY rejecting non-integers, hash commands rejecting string keys.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::RemoteStore;
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::pattern::glob_match;
use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expire_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expire_at.map(|at| at <= now).unwrap_or(false)
    }
}

// == Memory Store ==
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Seconds until `key` expires, `None` when it is absent or has no TTL.
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expire_at)
            .map(|at| at - now)
    }

    fn deadline(&self, ttl: Option<u64>) -> Option<i64> {
        ttl.map(|secs| self.clock.now().saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge(entries: &mut HashMap<String, Entry>, key: &str, now: i64) {
    if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
        entries.remove(key);
    }
}

/// Drops `key` if it has expired, then returns the live entry.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: i64) -> Option<&'a mut Entry> {
    purge(entries, key, now);
    entries.get_mut(key)
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType(format!("{} holds the wrong kind of value", key))
}

fn as_str<'a>(entry: &'a Entry, key: &str) -> Result<&'a str> {
    match &entry.slot {
        Slot::Str(s) => Ok(s),
        Slot::Hash(_) => Err(wrong_type(key)),
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key, now) {
            Some(entry) => Ok(Some(as_str(entry, key)?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<()> {
        let expire_at = self.deadline(ttl);
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(value.to_string()),
                expire_at,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<bool> {
        let now = self.clock.now();
        let expire_at = self.deadline(ttl);
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(value.to_string()),
                expire_at,
            },
        );
        Ok(true)
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let previous = match live(&mut entries, key, now) {
            Some(entry) => Some(as_str(entry, key)?.to_string()),
            None => None,
        };
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(value.to_string()),
                expire_at: None,
            },
        );
        Ok(previous)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key, now).is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key, now) {
            Some(entry) => {
                let current: i64 = as_str(entry, key)?
                    .parse()
                    .map_err(|_| CacheError::NotInteger(key.to_string()))?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CacheError::NotInteger(key.to_string()))?;
                entry.slot = Slot::Str(next.to_string());
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        slot: Slot::Str(delta.to_string()),
                        expire_at: None,
                    },
                );
                Ok(delta)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key, now) {
            Some(entry) => {
                entry.expire_at = Some(now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        if live(&mut entries, src, now).is_none() {
            return Ok(false);
        }
        if let Some(entry) = entries.remove(src) {
            entries.insert(dst.to_string(), entry);
        }
        Ok(true)
    }

    async fn rename_nx(&self, src: &str, dst: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        if live(&mut entries, src, now).is_none() || live(&mut entries, dst, now).is_some() {
            return Ok(false);
        }
        if let Some(entry) = entries.remove(src) {
            entries.insert(dst.to_string(), entry);
        }
        Ok(true)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            // a pipelined GET against a hash yields a per-command error; treat it as a miss
            let value = live(&mut entries, key, now)
                .and_then(|entry| as_str(entry, key).ok().map(str::to_string));
            values.push(value);
        }
        Ok(values)
    }

    async fn set_many(&self, pairs: &[(String, String)], ttl: Option<u64>) -> Result<()> {
        let expire_at = self.deadline(ttl);
        let mut entries = self.entries.lock().await;
        for (key, value) in pairs {
            entries.insert(
                key.clone(),
                Entry {
                    slot: Slot::Str(value.clone()),
                    expire_at,
                },
            );
        }
        Ok(())
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        for (field, value) in fields {
            self.hset(key, field, value).await?;
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Hash(HashMap::new()),
            expire_at: None,
        });
        match &mut entry.slot {
            Slot::Hash(map) => Ok(map.insert(field.to_string(), value.to_string()).is_none()),
            Slot::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key, now).map(|e| &e.slot) {
            Some(Slot::Hash(map)) => Ok(map.clone()),
            Some(Slot::Str(_)) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hget_many(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key, now).map(|e| &e.slot) {
            Some(Slot::Hash(map)) => Ok(fields.iter().map(|f| map.get(f).cloned()).collect()),
            Some(Slot::Str(_)) => Err(wrong_type(key)),
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = live(&mut entries, key, now) else {
            return Ok(0);
        };
        let Slot::Hash(map) = &mut entry.slot else {
            return Err(wrong_type(key));
        };
        let removed = fields.iter().filter(|f| map.remove(f.as_str()).is_some()).count() as u64;
        if map.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (store, clock) = store();
        store.set("a", "1", Some(5)).await.unwrap();
        store.set("b", "2", None).await.unwrap();

        clock.advance(4);
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        clock.advance(1);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_set_clears_ttl() {
        let (store, _clock) = store();
        store.set("a", "1", Some(5)).await.unwrap();
        store.set("a", "2", None).await.unwrap();
        assert_eq!(store.ttl("a").await, None);
    }

    #[tokio::test]
    async fn test_set_nx() {
        let (store, clock) = store();
        assert!(store.set_nx("lock", "x", Some(2)).await.unwrap());
        assert!(!store.set_nx("lock", "y", Some(2)).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("x".to_string()));

        clock.advance(2);
        assert!(store.set_nx("lock", "y", Some(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_by_keeps_ttl_and_rejects_text() {
        let (store, _clock) = store();
        assert_eq!(store.incr_by("n", 3).await.unwrap(), 3);
        store.expire("n", 10).await.unwrap();
        assert_eq!(store.incr_by("n", -1).await.unwrap(), 2);
        assert_eq!(store.ttl("n").await, Some(10));

        store.set("s", "abc", None).await.unwrap();
        assert!(matches!(
            store.incr_by("s", 1).await,
            Err(CacheError::NotInteger(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_variants() {
        let (store, _clock) = store();
        assert!(!store.rename("missing", "x").await.unwrap());

        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", None).await.unwrap();
        assert!(!store.rename_nx("a", "b").await.unwrap());
        assert!(store.rename("a", "b").await.unwrap());
        assert_eq!(store.get("b").await.unwrap(), Some("1".to_string()));
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let (store, _clock) = store();
        for key in ["user_1", "user_2", "u_123"] {
            store.set(key, "v", None).await.unwrap();
        }
        assert_eq!(
            store.keys("user*").await.unwrap(),
            vec!["user_1".to_string(), "user_2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_hash_commands() {
        let (store, _clock) = store();
        assert!(store.hset("h", "a", "1").await.unwrap());
        assert!(!store.hset("h", "a", "2").await.unwrap());
        store
            .hset_many("h", &[("b".to_string(), "3".to_string())])
            .await
            .unwrap();

        let all = store.hget_all("h").await.unwrap();
        assert_eq!(all.get("a"), Some(&"2".to_string()));
        assert_eq!(
            store
                .hget_many("h", &["b".to_string(), "zz".to_string()])
                .await
                .unwrap(),
            vec![Some("3".to_string()), None]
        );
        assert_eq!(store.hdel("h", &["a".to_string()]).await.unwrap(), 1);

        store.set("s", "x", None).await.unwrap();
        assert!(matches!(
            store.hset("s", "f", "v").await,
            Err(CacheError::WrongType(_))
        ));
    }
}
