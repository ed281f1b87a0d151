//! Ahead-of-expiry reads shared by both backends.
//!
//! An entry written here carries `ahead_time = request time + ahead_ttl`.
//! Reads past that instant still serve the stored value but schedule a
//! refresh that runs after the caller returns. Entries without a marker never
//! trigger one. A deferred refresh stamps its marker from the time of the read
//! that scheduled it, not from when it happens to run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::contract::Producer;
use crate::cache::envelope::{self, CacheValue};
use crate::cache::scheduler::Scheduler;
use crate::error::{CacheError, Result};

// == Ahead Store ==
/// Raw access a backend exposes to the protocol. Keys are physical keys.
#[async_trait]
pub(crate) trait AheadStore: Clone + Send + Sync + 'static {
    async fn load_raw(&self, key: &str) -> Result<Option<String>>;

    /// Writes an already-encoded envelope under `key`.
    async fn store_raw(&self, key: &str, payload: String, ttl: i64) -> Result<bool>;

    async fn record_refresh(&self);

    /// Encodes a value with its ahead marker.
    fn encode(&self, value: &CacheValue, ahead_time: i64) -> Result<String> {
        envelope::serialize(value, Some(ahead_time))
    }

    fn decode(&self, raw: Option<&str>) -> Option<CacheValue> {
        envelope::deserialize(raw)
    }

    fn now(&self) -> i64;

    fn scheduler(&self) -> Arc<dyn Scheduler>;
}

// == Read Ahead ==
pub(crate) async fn read_ahead<S: AheadStore>(
    store: &S,
    key: &str,
    ttl: i64,
    ahead_ttl: i64,
    producer: Producer,
    cache_empty: bool,
) -> Result<CacheValue> {
    if ttl > 0 && ahead_ttl >= ttl {
        return Err(CacheError::InvalidRequest(format!(
            "ahead_ttl ({}) must be shorter than ttl ({})",
            ahead_ttl, ttl
        )));
    }

    let now = store.now();
    let raw = store.load_raw(key).await?;

    let value = match store.decode(raw.as_deref()) {
        Some(value) if cache_empty || !value.is_empty() => value,
        _ => refresh(store, key, ttl, ahead_ttl, &producer, cache_empty, now).await?,
    };

    if envelope::ahead_time(raw.as_deref()) < now {
        debug!("ahead time passed for {}, scheduling refresh", key);
        store.record_refresh().await;

        let scheduler = store.scheduler();
        let store = store.clone();
        let key = key.to_string();
        scheduler.defer(Box::pin(async move {
            if let Err(err) = refresh(&store, &key, ttl, ahead_ttl, &producer, cache_empty, now).await {
                warn!("background refresh of {} failed: {}", key, err);
            }
        }));
    }

    Ok(value)
}

/// Runs the producer and stores its result with the marker
/// `requested_at + ahead_ttl`.
async fn refresh<S: AheadStore>(
    store: &S,
    key: &str,
    ttl: i64,
    ahead_ttl: i64,
    producer: &Producer,
    cache_empty: bool,
    requested_at: i64,
) -> Result<CacheValue> {
    let fresh = producer().await?;
    if cache_empty || !fresh.is_empty() {
        let payload = store.encode(&fresh, requested_at.saturating_add(ahead_ttl))?;
        store.store_raw(key, payload, ttl).await?;
    }
    Ok(fresh)
}
