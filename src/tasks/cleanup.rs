//! Local Table Sweep Task
//!
//! Background task that periodically clears expired rows from the local
//! table and, on a slower cadence, drops rows that are rarely read.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::LocalTableCache;

/// Spawns a background task that sweeps the local table.
///
/// Every `expire_interval_secs` the task clears rows whose scheduled expiry
/// has passed. Once at least `cold_interval_secs` have gone by since the last
/// cold sweep it also drops rows read fewer than the configured threshold.
/// A `cold_interval_secs` of zero disables the cold sweep.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = LocalTableCache::new(LocalTableConfig::default());
/// let sweep_handle = spawn_sweep_task(cache.clone(), 1, 300);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(
    cache: LocalTableCache,
    expire_interval_secs: u64,
    cold_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(expire_interval_secs.max(1));
    let cold_interval = Duration::from_secs(cold_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting sweep task: expiry every {}s, cold sweep every {}s",
            expire_interval_secs, cold_interval_secs
        );
        let mut last_cold_sweep = Instant::now();

        loop {
            tokio::time::sleep(interval).await;

            let expired = cache.sweep_expired().await;
            if expired.is_empty() {
                debug!("Expiry sweep: no expired entries found");
            } else {
                info!("Expiry sweep: removed {} expired entries", expired.len());
            }

            if cold_interval_secs == 0 || last_cold_sweep.elapsed() < cold_interval {
                continue;
            }
            last_cold_sweep = Instant::now();

            let cold = cache.clear_cold().await;
            debug!("Cold sweep: {} rarely read entries removed", cold.len());
        }
    })
}
