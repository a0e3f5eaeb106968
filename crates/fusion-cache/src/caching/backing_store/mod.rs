//! The persistent second tier of the cache.
//!
//! A [`BackingStore`] is a long-lived handle to some external cache substrate, created once
//! from configuration and shared by all [`Cacher`](super::Cacher)s of a
//! [`CacheContext`](super::CacheContext). There are three kinds:
//!
//! - [`FilesystemStore`]: one file per key below a root directory.
//! - [`RedisStore`]: a Redis server, entries expire server-side after `max_age`.
//! - [`MemcacheStore`]: a set of memcache servers, entries are checked for expiry when read.
//!
//! The facade methods never fail loudly. Connection problems, timeouts and undecodable entries
//! are logged as warnings and reported as [`BackingStoreError::KeyNotFound`] (for reads) or
//! silently dropped (for writes), so callers simply fall through to recomputing the value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::config::{BackingStoreConfig, Encoding};
use super::{BackingStoreError, CacheEntry, CacheKey, StoreResult};

mod filesystem;
mod memcache;
mod redis;

pub use self::filesystem::FilesystemStore;
pub use self::memcache::MemcacheStore;
pub use self::redis::RedisStore;

/// Timeout for reads and existence checks against network stores.
const FETCH_TIMEOUT: Duration = Duration::from_secs(1);
/// Timeout for writes against network stores.
const STORE_TIMEOUT: Duration = Duration::from_secs(5);

impl Encoding {
    pub(crate) fn encode<T: Serialize>(self, entry: &CacheEntry<T>) -> StoreResult<Vec<u8>> {
        Ok(match self {
            Self::Json => serde_json::to_vec(entry)?,
            Self::Yaml => serde_yaml::to_string(entry)?.into_bytes(),
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> StoreResult<CacheEntry<T>> {
        Ok(match self {
            Self::Json => serde_json::from_slice(bytes)?,
            Self::Yaml => serde_yaml::from_slice(bytes)?,
        })
    }
}

#[derive(Debug)]
pub enum BackingStore {
    Filesystem(FilesystemStore),
    Redis(RedisStore),
    Memcache(MemcacheStore),
}

impl BackingStore {
    /// Creates the backing store.
    ///
    /// If the store can not be created the error is logged and `None` is returned, which
    /// leaves the cache running on its in-process tier alone.
    pub async fn maybe_new(config: BackingStoreConfig) -> Option<Self> {
        let kind = config.kind();
        let result = match config {
            BackingStoreConfig::Filesystem(cfg) => Ok(Self::Filesystem(FilesystemStore::new(cfg))),
            BackingStoreConfig::Redis(cfg) => RedisStore::new(cfg).map(Self::Redis),
            BackingStoreConfig::Memcache(cfg) => MemcacheStore::connect(cfg).await.map(Self::Memcache),
        };
        match result {
            Ok(store) => {
                tracing::info!(kind, "Initialized cache backing store");
                Some(store)
            }
            Err(err) => {
                tracing::warn!(kind, error = %err, "Failed to initialize cache backing store");
                None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::Redis(_) => "redis",
            Self::Memcache(_) => "memcache",
        }
    }

    fn encoding(&self) -> Encoding {
        match self {
            Self::Filesystem(store) => store.encoding(),
            Self::Redis(_) => Encoding::Json,
            Self::Memcache(store) => store.encoding(),
        }
    }

    /// Checks whether anything is stored under `key`.
    ///
    /// This only reports presence and never looks at the birthday. An expired memcache entry
    /// therefore still exists until the next [`retrieve`](Self::retrieve) evicts it.
    ///
    /// Errors are logged and reported as `false`.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        let result = match self {
            Self::Filesystem(store) => store.exists(key).await,
            Self::Redis(store) => with_timeout(FETCH_TIMEOUT, store.exists(key)).await,
            Self::Memcache(store) => with_timeout(FETCH_TIMEOUT, store.exists(key)).await,
        };
        result.unwrap_or_else(|err| {
            tracing::warn!(
                backend = self.name(),
                key = %key,
                error = %err,
                "Failed checking backing store",
            );
            false
        })
    }

    /// Retrieves the entry stored under `key`.
    ///
    /// Fails with [`BackingStoreError::KeyNotFound`] if nothing usable is stored. For
    /// [`MemcacheStore`], entries which are at least `max_age` old count as not stored and
    /// are deleted.
    pub async fn retrieve<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<CacheEntry<T>> {
        let backend = self.name();
        let result = match self {
            Self::Filesystem(store) => store.retrieve(key).await,
            Self::Redis(store) => with_timeout(FETCH_TIMEOUT, store.retrieve(key)).await,
            Self::Memcache(store) => with_timeout(FETCH_TIMEOUT, store.retrieve(key)).await,
        };
        let decoded = result.and_then(|bytes| match bytes {
            Some(bytes) => self.encoding().decode::<T>(&bytes).map(Some),
            None => Ok(None),
        });

        let entry = match decoded {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                metric!(counter("backing_store.retrieve") += 1, "backend" => backend, "status" => "miss");
                return Err(BackingStoreError::KeyNotFound);
            }
            Err(err) => {
                metric!(counter("backing_store.retrieve") += 1, "backend" => backend, "status" => err.as_tag());
                tracing::warn!(
                    backend,
                    key = %key,
                    error = %err,
                    "Failed retrieving from backing store",
                );
                return Err(BackingStoreError::KeyNotFound);
            }
        };

        if let Self::Memcache(store) = self {
            if !entry.is_fresh(now, max_age) {
                store.evict(key).await;
                metric!(counter("backing_store.retrieve") += 1, "backend" => backend, "status" => "expired");
                return Err(BackingStoreError::KeyNotFound);
            }
        }

        metric!(counter("backing_store.retrieve") += 1, "backend" => backend, "status" => "hit");
        Ok(entry)
    }

    /// Stores `entry` under `key`, replacing whatever was there before.
    ///
    /// This is best-effort: failures are logged and otherwise ignored.
    pub async fn store<T: Serialize>(&self, key: &CacheKey, entry: &CacheEntry<T>, max_age: Duration) {
        let backend = self.name();
        let result = match self.encoding().encode(entry) {
            Ok(bytes) => match self {
                Self::Filesystem(store) => store.store(key, bytes).await,
                Self::Redis(store) => with_timeout(STORE_TIMEOUT, store.store(key, bytes, max_age)).await,
                Self::Memcache(store) => with_timeout(STORE_TIMEOUT, store.store(key, bytes)).await,
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                metric!(counter("backing_store.store") += 1, "backend" => backend, "status" => "ok");
            }
            Err(err) => {
                metric!(counter("backing_store.store") += 1, "backend" => backend, "status" => err.as_tag());
                tracing::warn!(
                    backend,
                    key = %key,
                    error = %err,
                    "Failed writing to backing store",
                );
            }
        }
    }
}

async fn with_timeout<T, F>(timeout: Duration, future: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or(Err(BackingStoreError::Timeout))
}
