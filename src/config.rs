//! Configuration Module
//!
//! Handles loading and managing engine and server configuration from
//! environment variables.

use std::env;
use std::str::FromStr;

use crate::cache::{PackMode, DEFAULT_TTL, LOCK_DEFAULT_TTL};
use crate::error::{CacheError, Result};

/// Default namespace prepended to every remote-store key.
pub const DEFAULT_NAMESPACE: &str = "sw_news:";

// == Backend Kind ==
/// Which backend the server fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Local,
    /// Local table in front of the remote store
    Tiered,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "redis" => Ok(BackendKind::Remote),
            "local" | "table" => Ok(BackendKind::Local),
            "tiered" => Ok(BackendKind::Tiered),
            other => Err(CacheError::Config(format!("unknown cache backend: {}", other))),
        }
    }
}

// == Remote Config ==
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Connection URL of the remote store
    pub url: String,
    /// Prefix for every physical key
    pub namespace: String,
    pub pack: PackMode,
    /// TTL of local copies of remote hits in the tiered backend
    pub fill_ttl: i64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            pack: PackMode::Envelope,
            fill_ttl: 0,
        }
    }
}

// == Local Table Config ==
/// Sizing and policy for the local-table backend.
#[derive(Debug, Clone)]
pub struct LocalTableConfig {
    /// Row capacity of a lazily created shard
    pub shard_rows: usize,
    /// Max serialized payload width of a shard row, in bytes
    pub shard_content_width: usize,
    pub lock_shard_rows: usize,
    pub lock_shard_width: usize,
    /// TTL applied when a write passes `ttl <= 0`
    pub default_ttl: i64,
    /// TTL applied when a lock passes `ttl <= 0`
    pub lock_ttl: i64,
    /// Rows read fewer times than this are dropped by the cold sweep
    pub cold_threshold: i64,
    /// Eviction rounds a full-shard write may run before giving up
    pub max_eviction_rounds: usize,
}

impl Default for LocalTableConfig {
    fn default() -> Self {
        Self {
            shard_rows: 16384,
            shard_content_width: 20480,
            lock_shard_rows: 1024,
            lock_shard_width: 64,
            default_ttl: DEFAULT_TTL,
            lock_ttl: LOCK_DEFAULT_TTL,
            cold_threshold: 5,
            max_eviction_rounds: 64,
        }
    }
}

// == Config ==
/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    pub backend: BackendKind,
    pub remote: RemoteConfig,
    pub local: LocalTableConfig,
    /// Seconds between expired-entry sweeps of the local table
    pub expire_sweep_interval: u64,
    /// Seconds between cold-entry sweeps of the local table
    pub cold_sweep_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_BACKEND` - `remote`, `local` or `tiered` (default: local)
    /// - `REDIS_URL` - remote store URL (default: redis://127.0.0.1:6379)
    /// - `CACHE_NAMESPACE` - remote key prefix (default: sw_news:)
    /// - `CACHE_PACK_MODE` - `envelope`, `json` or `object` (default: envelope)
    /// - `TIERED_FILL_TTL` - TTL of local copies in the tiered backend (default: 0, the local default)
    /// - `DEFAULT_TTL` - local TTL for `ttl <= 0` writes (default: 3600)
    /// - `SHARD_ROWS` / `SHARD_CONTENT_WIDTH` - shard sizing (default: 16384 / 20480)
    /// - `LOCK_SHARD_ROWS` / `LOCK_SHARD_WIDTH` - lock shard sizing (default: 1024 / 64)
    /// - `COLD_THRESHOLD` - cold sweep usage threshold (default: 5)
    /// - `MAX_EVICTION_ROUNDS` - eviction bound per write (default: 64)
    /// - `EXPIRE_SWEEP_INTERVAL` - seconds between expiry sweeps (default: 1)
    /// - `COLD_SWEEP_INTERVAL` - seconds between cold sweeps (default: 300)
    ///
    /// An unrecognised `CACHE_BACKEND` or `CACHE_PACK_MODE` is an error; other unparseable values
    /// fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let backend = match env::var("CACHE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.backend,
        };
        let pack = match env::var("CACHE_PACK_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.remote.pack,
        };

        Ok(Self {
            server_port: var("SERVER_PORT", defaults.server_port),
            backend,
            remote: RemoteConfig {
                url: var("REDIS_URL", defaults.remote.url),
                namespace: var("CACHE_NAMESPACE", defaults.remote.namespace),
                pack,
                fill_ttl: var("TIERED_FILL_TTL", defaults.remote.fill_ttl),
            },
            local: LocalTableConfig {
                shard_rows: var("SHARD_ROWS", defaults.local.shard_rows),
                shard_content_width: var("SHARD_CONTENT_WIDTH", defaults.local.shard_content_width),
                lock_shard_rows: var("LOCK_SHARD_ROWS", defaults.local.lock_shard_rows),
                lock_shard_width: var("LOCK_SHARD_WIDTH", defaults.local.lock_shard_width),
                default_ttl: var("DEFAULT_TTL", defaults.local.default_ttl),
                lock_ttl: defaults.local.lock_ttl,
                cold_threshold: var("COLD_THRESHOLD", defaults.local.cold_threshold),
                max_eviction_rounds: var("MAX_EVICTION_ROUNDS", defaults.local.max_eviction_rounds),
            },
            expire_sweep_interval: var("EXPIRE_SWEEP_INTERVAL", defaults.expire_sweep_interval),
            cold_sweep_interval: var("COLD_SWEEP_INTERVAL", defaults.cold_sweep_interval),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            backend: BackendKind::Local,
            remote: RemoteConfig::default(),
            local: LocalTableConfig::default(),
            expire_sweep_interval: 1,
            cold_sweep_interval: 300,
        }
    }
}

fn var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.remote.namespace, "sw_news:");
        assert_eq!(config.local.shard_rows, 16384);
        assert_eq!(config.local.shard_content_width, 20480);
        assert_eq!(config.local.lock_shard_rows, 1024);
        assert_eq!(config.local.lock_shard_width, 64);
        assert_eq!(config.local.default_ttl, 3600);
        assert_eq!(config.local.cold_threshold, 5);
        assert_eq!(config.cold_sweep_interval, 300);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("remote".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert_eq!(" Local ".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("tiered".parse::<BackendKind>().unwrap(), BackendKind::Tiered);
        assert!(matches!(
            "memcached".parse::<BackendKind>(),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_pack_mode_parse() {
        assert_eq!("JSON".parse::<PackMode>().unwrap(), PackMode::Json);
        assert_eq!("serialize".parse::<PackMode>().unwrap(), PackMode::Object);
        assert_eq!("default".parse::<PackMode>().unwrap(), PackMode::Envelope);
        assert!(matches!("xml".parse::<PackMode>(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "SERVER_PORT",
            "CACHE_BACKEND",
            "REDIS_URL",
            "CACHE_NAMESPACE",
            "CACHE_PACK_MODE",
            "TIERED_FILL_TTL",
            "DEFAULT_TTL",
            "SHARD_ROWS",
            "COLD_THRESHOLD",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.remote.url, "redis://127.0.0.1:6379");
        assert_eq!(config.remote.pack, PackMode::Envelope);
        assert_eq!(config.remote.fill_ttl, 0);
        assert_eq!(config.local.shard_rows, 16384);
        assert_eq!(config.local.cold_threshold, 5);
    }
}
