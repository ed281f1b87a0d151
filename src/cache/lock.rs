//! Locking Primitive
//!
//! Mutual exclusion built on each backend's conditional set, and a
//! single-flight gate that lets one caller compute a missing entry while the
//! others spin until it is populated.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::cache::contract::Cache;
use crate::cache::envelope::CacheValue;
use crate::error::{CacheError, Result};

/// Default poll interval for single-flight waiters.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Default lifetime of a single-flight gate, in seconds.
pub const DEFAULT_GATE_TTL: i64 = 4;

// == Lock ==
/// Advisory lock over a cache backend.
///
/// The first caller to `lock` a key wins. `unlock` is unconditional and does
/// not check who holds the lock. A lock also disappears when its TTL runs out.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Takes the lock. Returns false when it is already held.
    /// `ttl <= 0` falls back to [`crate::cache::LOCK_DEFAULT_TTL`].
    async fn lock(&self, key: &str, value: &str, ttl: i64) -> Result<bool>;

    async fn unlock(&self, key: &str) -> Result<bool>;

    async fn is_locked(&self, key: &str) -> Result<bool>;
}

// == Single Flight ==
/// Deduplicates concurrent computations of the same cache entry.
///
/// Waiters poll [`Lock::is_locked`]; they never block on the holder. When the
/// gate clears they re-read the entry, and if it is still empty (the holder
/// failed without writing) they compete for the gate themselves.
pub struct SingleFlight {
    gate: Arc<dyn Lock>,
    store: Arc<dyn Cache>,
    poll_interval: Duration,
    max_wait: Duration,
    gate_ttl: i64,
}

impl SingleFlight {
    pub fn new(gate: Arc<dyn Lock>, store: Arc<dyn Cache>) -> Self {
        Self {
            gate,
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: Duration::from_secs(DEFAULT_GATE_TTL as u64 * 2),
            gate_ttl: DEFAULT_GATE_TTL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on how long a waiter spins before giving up.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_gate_ttl(mut self, ttl: i64) -> Self {
        self.gate_ttl = ttl;
        self
    }

    /// Returns the cached entry, computing and storing it at most once across
    /// concurrent callers. Empty results are returned but not stored.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: i64, compute: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        let deadline = Instant::now() + self.max_wait;

        loop {
            if let Some(value) = self.store.get(key).await? {
                if !value.is_empty() {
                    return Ok(value);
                }
            }

            let mut waited = false;
            while self.gate.is_locked(key).await? {
                if Instant::now() >= deadline {
                    return Err(CacheError::LockTimeout(key.to_string()));
                }
                waited = true;
                sleep(self.poll_interval).await;
            }
            if waited {
                debug!("single-flight gate for {} cleared, re-reading", key);
                continue;
            }

            if self.gate.lock(key, "1", self.gate_ttl).await? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout(key.to_string()));
            }
        }

        let outcome = async {
            let value = compute().await?;
            if !value.is_empty() {
                self.store.set(key, value.clone(), ttl).await?;
            }
            Ok::<_, CacheError>(value)
        }
        .await;

        let unlocked = self.gate.unlock(key).await;
        let value = outcome?;
        unlocked?;
        Ok(value)
    }
}
