//! # Fusion Caching infrastructure
//!
//! Fusion sits in front of slow upstream services, most notably the remote template repository.
//! Responses of those services are cached, so that repeated lookups of the same templates are
//! served locally.
//!
//! ## Cache Layers
//!
//! - An in-process layer, one [`moka`] cache per [`Cacher`]. It is bounded by the configured
//!   `in_memory_capacity` and never evicts entries because of their age.
//! - An optional [`BackingStore`] shared by all cachers of a [`CacheContext`]: a directory on the
//!   local filesystem, a Redis server or a set of memcache servers. It survives restarts and can
//!   be shared by several processes.
//!
//! A cache request goes through the following steps:
//! - If caching is disabled, the operation is invoked directly and nothing is stored.
//! - The in-process layer is asked first.
//! - On miss, the backing store is asked. A hit is promoted into the in-process layer.
//! - On miss, the operation is invoked and its result is stored in both layers, together with
//!   the time it was computed (its "birthday").
//!
//! ## Freshness
//!
//! An entry is fresh while its age in whole seconds is strictly less than the cacher's
//! `max_age`. Stale entries are still returned right away, but a refresh is spawned in the
//! background. The [`RefreshCoordinator`] makes sure there is at most one running refresh per
//! key and that no more than `max_concurrent_refreshes` run at once.
//!
//! ### Metrics
//!
//! Each of these is tagged with a `cache` field naming the cacher:
//!
//! - `caches.access`: All accesses.
//! - `caches.disabled`: Accesses bypassing a disabled cache.
//! - `caches.memory.hit`: Accesses served by the in-process layer.
//! - `caches.store.hit`: Accesses served by the backing store.
//! - `caches.stale`: Hits that were served stale.
//! - `caches.computation`: Actual computations on a miss.
//! - `caches.refresh.{spawned,skipped,limit_hit,failed}`: The fate of background refreshes.
//!
//! The backing store additionally reports `backing_store.retrieve` and `backing_store.store`,
//! tagged with `backend` and `status`.
//!
//! ### Configuration
//!
//! All of this is gated by the `cache` section of the configuration file, see [`CacheConfig`].
//! Without it, every call goes straight to the wrapped operation.

mod backing_store;
mod cache_error;
mod cache_key;
mod clock;
mod config;
mod entry;
mod memory;
mod refresh;

pub use backing_store::{BackingStore, FilesystemStore, MemcacheStore, RedisStore};
pub use cache_error::{BackingStoreError, StoreResult};
pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackingStoreConfig, CacheConfig, Encoding, FilesystemStoreConfig, MemcacheStoreConfig,
    RedisStoreConfig,
};
pub use entry::CacheEntry;
pub use memory::{
    CacheContext, CacheItemRequest, CachedOperation, Cacher, OperationCall, default_key,
};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
