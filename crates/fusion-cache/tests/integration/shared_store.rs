use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fusion_cache::caching::{BackingStore, CacheConfig, CacheContext, CacheKey, Encoding};
use fusion_cache::caching::{FilesystemStore, FilesystemStoreConfig};

use crate::{counted_get_template, with_clock};

fn shared_store(dir: &fusion_test::TempDir, encoding: Encoding) -> BackingStore {
    BackingStore::Filesystem(FilesystemStore::new(FilesystemStoreConfig {
        path: dir.path().to_owned(),
        encoding,
    }))
}

/// Two processes sharing one backing store: the second one is served what the first one computed.
#[tokio::test]
async fn test_second_process_reuses_entry() {
    fusion_test::setup();

    let dir = fusion_test::tempdir();
    let (first, _) = with_clock(
        CacheContext::new(CacheConfig::default(), Some(shared_store(&dir, Encoding::Json))),
        1_000,
    );
    let (second, _) = with_clock(
        CacheContext::new(CacheConfig::default(), Some(shared_store(&dir, Encoding::Json))),
        1_060,
    );

    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));

    let computed = counted_get_template(&first, &first_calls)
        .call("wordpress".into())
        .await
        .unwrap();
    let reused = counted_get_template(&second, &second_calls)
        .call("wordpress".into())
        .await
        .unwrap();

    assert_eq!(computed, reused);
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

/// Staleness is decided by the birthday written by whichever process stored the entry.
#[tokio::test]
async fn test_stale_entry_from_other_process() {
    fusion_test::setup();

    let dir = fusion_test::tempdir();
    let config = CacheConfig {
        default_timeout: std::time::Duration::from_secs(120),
        ..Default::default()
    };
    let (first, _) = with_clock(
        CacheContext::new(config.clone(), Some(shared_store(&dir, Encoding::Yaml))),
        10,
    );
    let (second, _) = with_clock(
        CacheContext::new(config, Some(shared_store(&dir, Encoding::Yaml))),
        200,
    );

    let first_calls = Arc::new(AtomicUsize::new(0));
    counted_get_template(&first, &first_calls)
        .call("wordpress".into())
        .await
        .unwrap();

    let second_calls = Arc::new(AtomicUsize::new(0));
    let get_template = counted_get_template(&second, &second_calls);
    get_template.call("wordpress".into()).await.unwrap();

    // served stale, refreshed in the background
    for _ in 0..500 {
        if second.refreshes().in_flight() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);

    let key: CacheKey = get_template.key_for(&"wordpress".to_owned());
    let entry = get_template.cacher().peek(&key).await.unwrap();
    assert_eq!(entry.birthday.timestamp(), 200);
}
