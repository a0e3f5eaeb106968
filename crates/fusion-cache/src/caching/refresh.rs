use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;

use super::CacheKey;
use crate::utils::defer::defer;

/// What happened to a request to refresh a key in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A refresh task was spawned and the key is now marked as in flight.
    Spawned,
    /// Another refresh of the same key is already running.
    InFlight,
    /// Too many refreshes are running. A later stale hit will try again.
    LimitHit,
    /// There was no runtime to spawn the task on.
    SchedulingFailed,
}

/// Keeps track of keys being refreshed in the background.
///
/// Every key moves through `idle -> refreshing -> idle`. A key is marked as refreshing while its
/// task is alive and unmarked when the task finishes, fails or panics. Attempts to refresh a key
/// that is already refreshing do nothing.
///
/// The coordinator also bounds the total number of concurrently running refreshes.
pub struct RefreshCoordinator {
    /// Keys with a running refresh task.
    refreshes: Arc<Mutex<HashSet<CacheKey>>>,
    /// Remaining refresh slots. Counts down towards zero.
    available: Arc<AtomicIsize>,
    /// The runtime refresh tasks are spawned on. Falls back to the current runtime.
    runtime: Option<Handle>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let refreshes = self.refreshes.try_lock().map(|r| r.len()).unwrap_or_default();
        f.debug_struct("RefreshCoordinator")
            .field("running refreshes", &refreshes)
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(max_concurrent_refreshes: usize, runtime: Option<Handle>) -> Self {
        let limit = max_concurrent_refreshes.clamp(1, isize::MAX as usize) as isize;
        Self {
            refreshes: Default::default(),
            available: Arc::new(AtomicIsize::new(limit)),
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<CacheKey>> {
        self.refreshes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a refresh of `key` is currently running.
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.lock().contains(key)
    }

    /// The number of refreshes currently running.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Spawns `task` to refresh `key`, unless a refresh of `key` is already running.
    ///
    /// This never blocks on the task itself. The key is released once the task is dropped,
    /// whether it ran to completion, panicked or was abandoned by a shutting down runtime.
    pub fn try_spawn<F>(&self, key: CacheKey, task: F) -> RefreshOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut refreshes = self.lock();
        if refreshes.contains(&key) {
            return RefreshOutcome::InFlight;
        }

        // We count down towards zero, and if we reach or surpass it, we will stop here.
        if self.available.fetch_sub(1, Ordering::Relaxed) <= 0 {
            self.available.fetch_add(1, Ordering::Relaxed);
            return RefreshOutcome::LimitHit;
        }

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            self.available.fetch_add(1, Ordering::Relaxed);
            tracing::error!(key = %key, "Failed to schedule cache refresh: no async runtime");
            return RefreshOutcome::SchedulingFailed;
        };

        let done_token = {
            let key = key.clone();
            let refreshes = Arc::clone(&self.refreshes);
            let available = Arc::clone(&self.available);
            defer(move || {
                available.fetch_add(1, Ordering::Relaxed);
                refreshes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            })
        };

        refreshes.insert(key.clone());
        drop(refreshes);

        tracing::trace!(key = %key, "Spawning deduplicated cache refresh");

        let task = async move {
            let _done_token = done_token; // move into the future
            task.await;
        };
        runtime.spawn(task.bind_hub(Hub::new_from_top(Hub::current())));

        RefreshOutcome::Spawned
    }
}
