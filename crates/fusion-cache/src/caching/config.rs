use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a backing store serializes `(birthday, value)` entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Yaml,
}

impl AsRef<str> for Encoding {
    fn as_ref(&self) -> &str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemStoreConfig {
    /// Root directory holding one file per cache key.
    ///
    /// It is created on first write if it does not exist.
    pub path: PathBuf,

    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Connection string, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemcacheStoreConfig {
    /// The list of `host:port` pairs (or full `memcache://` URLs) of the memcache servers.
    pub servers: Vec<String>,

    #[serde(default)]
    pub encoding: Encoding,
}

/// The persistent second tier behind the in-process cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackingStoreConfig {
    Filesystem(FilesystemStoreConfig),
    Redis(RedisStoreConfig),
    Memcache(MemcacheStoreConfig),
}

impl BackingStoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::Redis(_) => "redis",
            Self::Memcache(_) => "memcache",
        }
    }
}

/// The `cache` section of the configuration file.
///
/// Its mere presence enables caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum age of an entry before it is served stale and refreshed in the background.
    ///
    /// Individual cachers may override this.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Maximum number of entries kept in each in-process cache.
    pub in_memory_capacity: u64,

    /// Maximum number of background refreshes running at the same time.
    ///
    /// Stale hits beyond this limit keep serving the stale value without refreshing.
    pub max_concurrent_refreshes: usize,

    /// The backing store, `None` keeps entries in process memory only.
    ///
    /// Written as a single-entry map naming the kind, e.g. `redis: { url: ... }`.
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub backing_store: Option<BackingStoreConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
            in_memory_capacity: 10_000,
            max_concurrent_refreshes: 20,
            backing_store: None,
        }
    }
}

fn default_redis_pool_size() -> usize {
    16
}
