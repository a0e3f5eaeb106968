//! Fetching template documents through the cache.
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fusion_cache::caching::{CacheContext, CacheKey, CachedOperation, default_key};
use fusion_cache::config::Config;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use url::Url;

/// Timeout for downloading a single template document.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

type FetchFn = Box<dyn Fn(Url) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type KeyFn = fn(&str, &Url) -> CacheKey;

/// `get_template` wrapped with the cache.
pub type CachedFetch = CachedOperation<Url, FetchFn, KeyFn>;

/// Downloads a template document and parses it into a structured value.
pub async fn fetch_template(client: reqwest::Client, url: Url) -> Result<Value> {
    tracing::debug!(%url, "Fetching template");
    let response = client
        .get(url.clone())
        .send()
        .await
        .context("failed to send request")?
        .error_for_status()
        .context("template not available")?;
    let body = response
        .text()
        .await
        .context("failed to read response body")?;
    parse_document(&body).with_context(|| format!("invalid template document at {url}"))
}

/// Parses a YAML or JSON document.
pub fn parse_document(body: &str) -> Result<Value> {
    Ok(serde_yaml::from_str(body)?)
}

/// Wraps [`fetch_template`] with the cache, keyed by URL.
pub fn cached_fetch(
    context: &Arc<CacheContext>,
    client: reqwest::Client,
    max_age: Option<Duration>,
) -> CachedFetch {
    let operation: FetchFn = Box::new(move |url: Url| fetch_template(client.clone(), url).boxed());
    context.wrap(
        "get_template",
        max_age,
        operation,
        default_key::<Url> as KeyFn,
    )
}

/// Fetches `url` `repeat` times through the cache and prints the document as JSON.
pub async fn run(config: Config, url: Url, repeat: usize, max_age: Option<Duration>) -> Result<()> {
    let context = Arc::new(CacheContext::from_config(config.cache).await);
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let get_template = cached_fetch(&context, client, max_age);

    let mut document = Value::Null;
    for attempt in 1..=repeat.max(1) {
        let start = Instant::now();
        document = get_template.call(url.clone()).await?;
        tracing::info!(attempt, elapsed = ?start.elapsed(), "Fetched template");
    }

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use fusion_cache::caching::CacheConfig;
    use fusion_test::TemplateServer;

    use super::*;

    #[test]
    fn test_parse_yaml() {
        let body = fusion_test::read_fixture("templates/wordpress.yml");
        let document = parse_document(std::str::from_utf8(&body).unwrap()).unwrap();

        assert_eq!(document["description"], "Single node WordPress install");
        assert_eq!(
            document["resources"]["wordpress_server"]["type"],
            "OS::Nova::Server"
        );
    }

    #[test]
    fn test_parse_json() {
        let body = fusion_test::read_fixture("templates/catalog.json");
        let document = parse_document(std::str::from_utf8(&body).unwrap()).unwrap();

        assert_eq!(document["templates"][0]["id"], "wordpress");
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        fusion_test::setup();

        let server = TemplateServer::new();
        let context = Arc::new(CacheContext::from_config(Some(CacheConfig::default())).await);
        let get_template = cached_fetch(&context, reqwest::Client::new(), None);

        let url = server.url("wordpress.yml");
        let first = get_template.call(url.clone()).await.unwrap();
        let second = get_template.call(url).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first["parameters"]["flavor"]["type"], "string");
        assert_eq!(server.hits("wordpress.yml"), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_cache() {
        fusion_test::setup();

        let server = TemplateServer::new();
        let context = Arc::new(CacheContext::from_config(None).await);
        let get_template = cached_fetch(&context, reqwest::Client::new(), None);

        let url = server.url("catalog.json");
        get_template.call(url.clone()).await.unwrap();
        get_template.call(url).await.unwrap();

        assert_eq!(server.hits("catalog.json"), 2);
    }

    #[tokio::test]
    async fn test_missing_template_is_not_cached() {
        fusion_test::setup();

        let server = TemplateServer::new();
        let context = Arc::new(CacheContext::from_config(Some(CacheConfig::default())).await);
        let get_template = cached_fetch(&context, reqwest::Client::new(), None);

        let url = server.url("missing.yml");
        let error = get_template.call(url.clone()).await.unwrap_err();
        assert!(error.to_string().contains("template not available"));

        assert!(get_template.call(url).await.is_err());
        assert_eq!(server.hits("missing.yml"), 2);
    }
}
