//! Remote Store Module
//!
//! The command surface the remote-store cache backend needs from a networked
//! key-value store. Each method is one atomic command (or one pipelined batch).
//!
//! # Implementations
//! - [`RedisStore`]: a redis server over a multiplexed tokio connection
//! - [`MemoryStore`]: an in-process store with the same semantics, for tests
//!   and single-node development

mod memory;
mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

// == Remote Store ==
/// Raw key-value commands. TTLs are whole seconds; `None` means no expiry.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<()>;

    /// SET NX. Returns false without side effects when `key` exists.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<bool>;

    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool>;

    /// RENAME. Returns false when `src` does not exist.
    async fn rename(&self, src: &str, dst: &str) -> Result<bool>;

    /// RENAMENX. Returns false when `src` is missing or `dst` exists.
    async fn rename_nx(&self, src: &str, dst: &str) -> Result<bool>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Pipelined GETs, one round trip, results in key order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Pipelined SETs, one round trip.
    async fn set_many(&self, entries: &[(String, String)], ttl: Option<u64>) -> Result<()>;

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// HSET of one field. Returns true when the field is new.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hget_many(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;
}
