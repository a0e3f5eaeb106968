use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sentry::{Hub, SentryFutureExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use super::refresh::{RefreshCoordinator, RefreshOutcome};
use super::{BackingStore, CacheConfig, CacheEntry, CacheKey, Clock, SystemClock};

type InMemoryCache<T> = moka::future::Cache<CacheKey, CacheEntry<T>>;

/// Everything the [`Cacher`]s of one process share.
///
/// This holds the kill switch, the backing store handle, the refresh bookkeeping and the clock.
/// It is created once, usually from the `cache` section of the configuration file, and handed to
/// every place that creates cachers.
pub struct CacheContext {
    config: CacheConfig,
    enabled: AtomicBool,
    backing_store: Option<Arc<BackingStore>>,
    refreshes: RefreshCoordinator,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("enabled", &self.is_enabled())
            .field("config", &self.config)
            .field("backing_store", &self.backing_store)
            .field("refreshes", &self.refreshes)
            .field("clock", &self.clock)
            .finish()
    }
}

impl CacheContext {
    /// Creates an enabled context.
    ///
    /// Refreshes are spawned on the runtime this is called from, if any.
    pub fn new(config: CacheConfig, backing_store: Option<BackingStore>) -> Self {
        let refreshes =
            RefreshCoordinator::new(config.max_concurrent_refreshes, Handle::try_current().ok());
        Self {
            config,
            enabled: AtomicBool::new(true),
            backing_store: backing_store.map(Arc::new),
            refreshes,
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a context from the optional `cache` configuration section.
    ///
    /// A missing section yields a [disabled](Self::disabled) context. A backing store that fails
    /// to initialize is logged and left out.
    pub async fn from_config(config: Option<CacheConfig>) -> Self {
        let Some(config) = config else {
            tracing::info!("No cache configured, caching is disabled");
            return Self::disabled();
        };

        let backing_store = match config.backing_store.clone() {
            Some(store_config) => BackingStore::maybe_new(store_config).await,
            None => None,
        };
        Self::new(config, backing_store)
    }

    /// A context that bypasses caching entirely.
    pub fn disabled() -> Self {
        let context = Self::new(CacheConfig::default(), None);
        context.set_enabled(false);
        context
    }

    /// Replaces the clock used for freshness decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawns background refreshes on `runtime` instead of the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.refreshes = RefreshCoordinator::new(self.config.max_concurrent_refreshes, Some(runtime));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flips the kill switch. Takes effect for the next call of every cacher.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backing_store(&self) -> Option<&BackingStore> {
        self.backing_store.as_deref()
    }

    pub fn refreshes(&self) -> &RefreshCoordinator {
        &self.refreshes
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates a [`Cacher`] for one kind of request.
    ///
    /// `max_age` defaults to the configured `default_timeout`.
    pub fn cacher<T: CacheItemRequest>(
        self: &Arc<Self>,
        name: &str,
        max_age: Option<Duration>,
    ) -> Cacher<T> {
        Cacher::new(Arc::clone(self), name, max_age)
    }

    /// Wraps `operation` with caching.
    ///
    /// `key_fn` derives the cache key of one call from the operation name and the call's
    /// arguments. [`default_key`] renders all arguments into the key.
    pub fn wrap<A, F, Fut, V, E, K>(
        self: &Arc<Self>,
        name: &str,
        max_age: Option<Duration>,
        operation: F,
        key_fn: K,
    ) -> CachedOperation<A, F, K>
    where
        A: 'static + Send + Sync + Clone,
        F: 'static + Send + Sync + Fn(A) -> Fut,
        Fut: 'static + Send + Future<Output = Result<V, E>>,
        V: 'static + Send + Sync + Clone + Serialize + DeserializeOwned,
        E: 'static + Send + fmt::Display,
        K: Fn(&str, &A) -> CacheKey,
    {
        CachedOperation {
            cacher: self.cacher(name, max_age),
            operation: Arc::new(operation),
            key_fn,
        }
    }
}

/// Builds a key from the operation name and all of its arguments.
pub fn default_key<A: Serialize>(operation: &str, args: &A) -> CacheKey {
    CacheKey::builder(operation).arg(args).build()
}

pub trait CacheItemRequest: 'static + Send + Sync + Clone {
    type Item: 'static + Send + Sync + Clone + Serialize + DeserializeOwned;
    type Error: 'static + Send + fmt::Display;

    /// Invoked to compute a fresh instance of this item, on a miss or to refresh a stale one.
    fn compute(&self) -> BoxFuture<'_, Result<Self::Item, Self::Error>>;
}

/// A two-tier read-through cache for one kind of request.
///
/// Lookups go to the in-process cache first and to the [`BackingStore`] second. Values found in
/// the backing store are promoted into the in-process cache. Entries older than `max_age` are
/// still served, but trigger a deduplicated refresh in the background.
///
/// The in-process cache never evicts entries because of their age, only because of its capacity.
pub struct Cacher<T: CacheItemRequest> {
    name: Arc<str>,
    max_age: Duration,
    context: Arc<CacheContext>,
    cache: InMemoryCache<T::Item>,
}

impl<T: CacheItemRequest> fmt::Debug for Cacher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacher")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .field("in-memory items", &self.cache.entry_count())
            .field("context", &self.context)
            .finish()
    }
}

impl<T: CacheItemRequest> Clone for Cacher<T> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Cacher {
            name: Arc::clone(&self.name),
            max_age: self.max_age,
            context: Arc::clone(&self.context),
            cache: self.cache.clone(),
        }
    }
}

impl<T: CacheItemRequest> Cacher<T> {
    pub fn new(context: Arc<CacheContext>, name: &str, max_age: Option<Duration>) -> Self {
        let cache = InMemoryCache::builder()
            .max_capacity(context.config.in_memory_capacity)
            .name(name)
            .build();

        Cacher {
            name: name.into(),
            max_age: max_age.unwrap_or(context.config.default_timeout),
            context,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    /// Returns the entry currently held in process memory, without touching the backing store.
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheEntry<T::Item>> {
        self.cache.get(key).await
    }

    /// Computes an item by loading it from or populating the cache.
    ///
    /// A fresh hit is returned as is. A stale hit is returned as is while a refresh is started in
    /// the background, unless one is already running for `cache_key`. A miss invokes
    /// [`T::compute`](CacheItemRequest::compute) and stores its result in both tiers.
    ///
    /// Concurrent misses of the same key are not coalesced: each of them computes and writes,
    /// and the last write wins.
    ///
    /// # Errors
    ///
    /// Only errors of [`T::compute`](CacheItemRequest::compute) on a miss are returned. Problems
    /// with the backing store are logged and treated like a miss.
    pub async fn compute_memoized(
        &self,
        request: T,
        cache_key: CacheKey,
    ) -> Result<T::Item, T::Error> {
        let name = self.name.as_ref();
        metric!(counter("caches.access") += 1, "cache" => name);

        if !self.context.is_enabled() {
            metric!(counter("caches.disabled") += 1, "cache" => name);
            return request.compute().await;
        }

        let now = self.context.now();
        let Some(entry) = self.lookup(&cache_key, now).await else {
            return self.compute_and_store(request, cache_key).await;
        };

        if entry.is_fresh(now, self.max_age) {
            tracing::trace!(cache = name, key = %cache_key, "Fresh cache hit");
            return Ok(entry.into_value());
        }

        metric!(counter("caches.stale") += 1, "cache" => name);
        tracing::debug!(
            cache = name,
            key = %cache_key,
            age = entry.age(now),
            "Serving stale cache entry",
        );
        self.spawn_refresh(request, cache_key);
        Ok(entry.into_value())
    }

    /// Looks an entry up in process memory, then in the backing store.
    async fn lookup(&self, cache_key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry<T::Item>> {
        let name = self.name.as_ref();
        if let Some(entry) = self.cache.get(cache_key).await {
            metric!(counter("caches.memory.hit") += 1, "cache" => name);
            return Some(entry);
        }

        let backing_store = self.context.backing_store()?;
        let entry = backing_store
            .retrieve::<T::Item>(cache_key, self.max_age, now)
            .await
            .ok()?;

        metric!(counter("caches.store.hit") += 1, "cache" => name);
        self.cache.insert(cache_key.clone(), entry.clone()).await;
        Some(entry)
    }

    async fn compute_and_store(
        &self,
        request: T,
        cache_key: CacheKey,
    ) -> Result<T::Item, T::Error> {
        metric!(counter("caches.computation") += 1, "cache" => self.name.as_ref());
        tracing::trace!(cache = self.name.as_ref(), key = %cache_key, "Cache miss");

        let item = request
            .compute()
            // Bind a fresh hub so scopes pushed by the computation can not leak into the caller.
            .bind_hub(Hub::new_from_top(Hub::current()))
            .await?;

        let entry = CacheEntry::new(self.context.now(), item.clone());
        self.store(cache_key, entry).await;
        Ok(item)
    }

    /// Writes `entry` to both tiers. Failures of the backing store are only logged.
    async fn store(&self, cache_key: CacheKey, entry: CacheEntry<T::Item>) {
        if let Some(backing_store) = self.context.backing_store() {
            backing_store.store(&cache_key, &entry, self.max_age).await;
        }
        self.cache.insert(cache_key, entry).await;
    }

    fn spawn_refresh(&self, request: T, cache_key: CacheKey) {
        let name = self.name.as_ref();

        let this = self.clone();
        let key = cache_key.clone();
        let task = async move {
            match request.compute().await {
                Ok(item) => {
                    let entry = CacheEntry::new(this.context.now(), item);
                    this.store(key, entry).await;
                }
                Err(err) => {
                    metric!(counter("caches.refresh.failed") += 1, "cache" => this.name.as_ref());
                    tracing::warn!(
                        cache = this.name.as_ref(),
                        key = %key,
                        error = %err,
                        "Failed to refresh stale cache entry",
                    );
                }
            }
        };

        match self.context.refreshes().try_spawn(cache_key, task) {
            RefreshOutcome::Spawned => {
                metric!(counter("caches.refresh.spawned") += 1, "cache" => name);
            }
            RefreshOutcome::InFlight => {
                metric!(counter("caches.refresh.skipped") += 1, "cache" => name);
            }
            RefreshOutcome::LimitHit => {
                metric!(counter("caches.refresh.limit_hit") += 1, "cache" => name);
            }
            RefreshOutcome::SchedulingFailed => {
                metric!(counter("caches.refresh.failed") += 1, "cache" => name);
            }
        }
    }
}

/// One call of a wrapped operation, with the arguments it was called with.
pub struct OperationCall<A, F> {
    operation: Arc<F>,
    args: A,
}

impl<A: Clone, F> Clone for OperationCall<A, F> {
    fn clone(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            args: self.args.clone(),
        }
    }
}

impl<A, F, Fut, V, E> CacheItemRequest for OperationCall<A, F>
where
    A: 'static + Send + Sync + Clone,
    F: 'static + Send + Sync + Fn(A) -> Fut,
    Fut: 'static + Send + Future<Output = Result<V, E>>,
    V: 'static + Send + Sync + Clone + Serialize + DeserializeOwned,
    E: 'static + Send + fmt::Display,
{
    type Item = V;
    type Error = E;

    fn compute(&self) -> BoxFuture<'_, Result<V, E>> {
        Box::pin((self.operation)(self.args.clone()))
    }
}

/// An operation wrapped with caching, see [`CacheContext::wrap`].
pub struct CachedOperation<A, F, K>
where
    OperationCall<A, F>: CacheItemRequest,
{
    cacher: Cacher<OperationCall<A, F>>,
    operation: Arc<F>,
    key_fn: K,
}

impl<A, F, K> fmt::Debug for CachedOperation<A, F, K>
where
    OperationCall<A, F>: CacheItemRequest,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedOperation")
            .field("cacher", &self.cacher)
            .finish()
    }
}

impl<A, F, K> CachedOperation<A, F, K>
where
    OperationCall<A, F>: CacheItemRequest,
    K: Fn(&str, &A) -> CacheKey,
{
    pub fn cacher(&self) -> &Cacher<OperationCall<A, F>> {
        &self.cacher
    }

    /// The key a call with `args` is cached under.
    pub fn key_for(&self, args: &A) -> CacheKey {
        (self.key_fn)(self.cacher.name(), args)
    }

    /// Calls the operation through the cache.
    ///
    /// With caching disabled the operation is invoked directly, without deriving a key.
    pub async fn call(
        &self,
        args: A,
    ) -> Result<
        <OperationCall<A, F> as CacheItemRequest>::Item,
        <OperationCall<A, F> as CacheItemRequest>::Error,
    > {
        let request = OperationCall {
            operation: Arc::clone(&self.operation),
            args,
        };

        if !self.cacher.context().is_enabled() {
            let name = self.cacher.name();
            metric!(counter("caches.access") += 1, "cache" => name);
            metric!(counter("caches.disabled") += 1, "cache" => name);
            let result = request.compute().await;
            return result;
        }

        let key = self.key_for(&request.args);
        self.cacher.compute_memoized(request, key).await
    }
}
