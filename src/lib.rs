//! tiercache - a two-tier cache engine
//!
//! One cache contract over a namespaced remote key-value store and a bounded
//! local shared table, with stampede-safe locking, a type-preserving value
//! envelope and ahead-of-expiry refresh.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, CacheValue, LocalTableCache, Lock, RemoteCache, SingleFlight, TieredCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use store::{MemoryStore, RedisStore, RemoteStore};
pub use tasks::spawn_sweep_task;
