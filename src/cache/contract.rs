//! Cache Contract
//!
//! The operations every backend provides. Callers pick a backend by policy;
//! code written against [`Cache`] works unchanged on either.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::cache::envelope::CacheValue;
use crate::cache::lock::Lock;
use crate::cache::stats::CacheStats;
use crate::error::Result;

// == Producer ==
/// Recomputes a cached value. Shared so a deferred refresh can run it again.
pub type Producer = Arc<dyn Fn() -> BoxFuture<'static, Result<CacheValue>> + Send + Sync>;

/// Wraps an async closure as a [`Producer`].
pub fn producer<F, Fut>(f: F) -> Producer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheValue>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

// == Fallback ==
/// Default for a missed read: a value, or a thunk evaluated once on the miss path.
pub enum Fallback {
    Value(CacheValue),
    Lazy(Box<dyn FnOnce() -> CacheValue + Send>),
}

impl Fallback {
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> CacheValue + Send + 'static,
    {
        Fallback::Lazy(Box::new(f))
    }

    pub fn resolve(self) -> CacheValue {
        match self {
            Fallback::Value(value) => value,
            Fallback::Lazy(f) => f(),
        }
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Fallback::Value(CacheValue::Null)
    }
}

impl From<CacheValue> for Fallback {
    fn from(value: CacheValue) -> Self {
        Fallback::Value(value)
    }
}

// == Cache ==
/// Uniform cache contract. TTLs are in seconds.
#[async_trait]
pub trait Cache: Lock + Send + Sync {
    /// Backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Reads a value. Absent, expired and stored-null entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Reads a value, falling back to `default` on a miss.
    async fn get_or(&self, key: &str, default: Fallback) -> Result<CacheValue> {
        Ok(match self.get(key).await? {
            Some(value) => value,
            None => default.resolve(),
        })
    }

    /// Stores a value. `ttl <= 0` means no expiry where the backend allows it.
    async fn set(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool>;

    /// Stores a value only if `key` is absent. Returns false if it exists.
    async fn set_nx(&self, key: &str, value: CacheValue, ttl: i64) -> Result<bool>;

    /// Swaps in `value` and returns the previous one; `ttl` is re-applied.
    /// Fails rather than returning the previous value when the new one is
    /// not stored.
    async fn get_set(&self, key: &str, value: CacheValue, ttl: i64)
        -> Result<Option<CacheValue>>;

    async fn has(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn delete_multiple(&self, keys: &[String]) -> Result<bool>;

    /// Adds one; an absent key starts at `default` when `default != 1`.
    async fn incr(&self, key: &str, ttl: Option<i64>, default: i64) -> Result<i64> {
        self.incr_by(key, ttl, 1, default).await
    }

    /// Subtracts one; an absent key starts at `default` when `default != -1`.
    async fn decr(&self, key: &str, ttl: Option<i64>, default: i64) -> Result<i64> {
        self.decr_by(key, ttl, 1, default).await
    }

    /// Adds `amount`. A positive `ttl` is re-applied on every call.
    async fn incr_by(&self, key: &str, ttl: Option<i64>, amount: i64, default: i64)
        -> Result<i64>;

    /// Subtracts `amount`. A positive `ttl` is re-applied on every call.
    /// `i64::MIN` cannot be negated and is rejected.
    async fn decr_by(&self, key: &str, ttl: Option<i64>, amount: i64, default: i64)
        -> Result<i64>;

    async fn expire(&self, key: &str, ttl: i64) -> Result<bool>;

    /// Renames `src` to `dst`. Without `force` it fails when `dst` exists.
    async fn rename(&self, src: &str, dst: &str, force: bool) -> Result<bool>;

    /// Logical keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn delete_by_pattern(&self, pattern: &str) -> Result<bool>;

    async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, Option<CacheValue>>>;

    async fn set_multiple(&self, values: HashMap<String, CacheValue>, ttl: i64) -> Result<bool>;

    /// Stale-while-revalidate read.
    ///
    /// Serves the stored value; recomputes synchronously only on a true miss,
    /// and schedules a background refresh once the entry's ahead-of-expiry
    /// marker (`write time + ahead_ttl`) has passed.
    async fn get_ahead_cache(
        &self,
        key: &str,
        ttl: i64,
        ahead_ttl: i64,
        producer: Producer,
        cache_empty: bool,
    ) -> Result<CacheValue>;

    async fn stats(&self) -> CacheStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fallback_value() {
        let fallback: Fallback = CacheValue::from("x").into();
        assert_eq!(fallback.resolve(), CacheValue::from("x"));
        assert_eq!(Fallback::default().resolve(), CacheValue::Null);
    }

    #[test]
    fn test_fallback_lazy_runs_once_on_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let fallback = Fallback::lazy(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            CacheValue::Integer(5)
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(fallback.resolve(), CacheValue::Integer(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_is_rerunnable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let make = producer(move || {
            let n = counted.fetch_add(1, Ordering::SeqCst) as i64;
            async move { Ok(CacheValue::Integer(n)) }
        });

        assert_eq!(make().await.unwrap(), CacheValue::Integer(0));
        assert_eq!(make().await.unwrap(), CacheValue::Integer(1));
    }
}
