//! Cache Module
//!
//! Two interchangeable cache backends behind one contract: a namespaced
//! remote key-value store and a bounded local shared table. Both carry
//! values in the typed envelope and support ahead-of-expiry refresh. A
//! tiered cache puts the local table in front of the remote store.

mod ahead;
pub(crate) mod clock;
mod contract;
pub mod envelope;
mod local;
mod lock;
pub(crate) mod pattern;
mod remote;
mod scheduler;
mod stats;
pub mod table;
mod tiered;
pub mod timer;


// Re-export public types
pub use clock::{current_timestamp, Clock, ManualClock, SystemClock};
pub use contract::{producer, Cache, Fallback, Producer};
pub use envelope::{CacheValue, PackMode};
pub use local::{md5_hex, normalize_key, shard_name, LocalTableCache, COMMON_SHARD, LOCK_SHARD};
pub use lock::{Lock, SingleFlight};
pub use pattern::glob_match;
pub use remote::RemoteCache;
pub use scheduler::{DeferQueue, Scheduler, Task, TokioScheduler};
pub use stats::CacheStats;
pub use table::SharedTable;
pub use tiered::TieredCache;
pub use timer::EvictionTimer;

// == Public Constants ==
/// TTL in seconds applied when a local write asks for `ttl <= 0`
pub const DEFAULT_TTL: i64 = 3600;

/// TTL in seconds applied when a lock asks for `ttl <= 0`
pub const LOCK_DEFAULT_TTL: i64 = 30;
