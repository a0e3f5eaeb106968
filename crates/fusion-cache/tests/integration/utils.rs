use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fusion_cache::caching::{CacheContext, CacheKey, CachedOperation, ManualClock};
use fusion_cache::config::Config;
use futures::FutureExt;
use futures::future::BoxFuture;

/// Builds a cache context from a YAML configuration snippet.
pub async fn context_from_yaml(yaml: &str) -> CacheContext {
    let config = Config::from_reader(yaml.as_bytes()).unwrap();
    CacheContext::from_config(config.cache).await
}

pub type CountedFn = Box<dyn Fn(String) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Wraps a fake `get_template` operation that counts its invocations.
pub fn counted_get_template(
    context: &Arc<CacheContext>,
    calls: &Arc<AtomicUsize>,
) -> CachedOperation<String, CountedFn, fn(&str, &String) -> CacheKey> {
    let calls = Arc::clone(calls);
    let operation: CountedFn = Box::new(move |name: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, String>(format!("heat_template_version: 2013-05-23 # {name}")) }.boxed()
    });
    context.wrap(
        "get_template",
        None,
        operation,
        template_key as fn(&str, &String) -> CacheKey,
    )
}

#[allow(clippy::ptr_arg)]
fn template_key(operation: &str, name: &String) -> CacheKey {
    CacheKey::builder(operation).arg(name).build()
}

/// Attaches a manual clock reading `secs` to a context.
pub fn with_clock(context: CacheContext, secs: i64) -> (Arc<CacheContext>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(secs));
    let context = context.with_clock(clock.clone());
    (Arc::new(context), clock)
}
