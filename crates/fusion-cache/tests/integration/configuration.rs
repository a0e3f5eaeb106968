use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{context_from_yaml, counted_get_template};

#[tokio::test]
async fn test_no_cache_section() {
    fusion_test::setup();

    let context = Arc::new(
        context_from_yaml(
            r#"
            logging:
              level: debug
            "#,
        )
        .await,
    );
    assert!(!context.is_enabled());

    let calls = Arc::new(AtomicUsize::new(0));
    let get_template = counted_get_template(&context, &calls);
    for _ in 0..3 {
        get_template.call("wordpress".into()).await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_in_memory_only() {
    fusion_test::setup();

    let context = Arc::new(context_from_yaml("cache: {}").await);
    assert!(context.is_enabled());
    assert!(context.backing_store().is_none());

    let calls = Arc::new(AtomicUsize::new(0));
    let get_template = counted_get_template(&context, &calls);
    for _ in 0..3 {
        get_template.call("wordpress".into()).await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_filesystem_store_from_config() {
    fusion_test::setup();

    let dir = fusion_test::tempdir();
    let yaml = format!(
        r#"
        cache:
          default_timeout: 10m
          backing_store:
            filesystem:
              path: {}
              encoding: yaml
        "#,
        dir.path().join("templates").display()
    );
    let context = Arc::new(context_from_yaml(&yaml).await);
    assert_eq!(context.backing_store().unwrap().name(), "filesystem");

    let calls = Arc::new(AtomicUsize::new(0));
    let get_template = counted_get_template(&context, &calls);
    assert_eq!(get_template.cacher().max_age().as_secs(), 600);

    get_template.call("wordpress".into()).await.unwrap();

    let key = get_template.key_for(&"wordpress".to_owned());
    let path = dir.path().join("templates").join(key.file_name());
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.starts_with("birthday: "));
    assert!(contents.contains("value: "));
}

#[tokio::test]
async fn test_broken_backing_store_is_left_out() {
    fusion_test::setup();

    let context = Arc::new(
        context_from_yaml(
            r#"
            cache:
              backing_store:
                redis:
                  url: http://localhost:6379
            "#,
        )
        .await,
    );
    assert!(context.is_enabled());
    assert!(context.backing_store().is_none());

    let calls = Arc::new(AtomicUsize::new(0));
    let get_template = counted_get_template(&context, &calls);
    get_template.call("wordpress".into()).await.unwrap();
    get_template.call("wordpress".into()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
