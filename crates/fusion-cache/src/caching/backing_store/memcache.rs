use std::sync::Arc;
use std::time::Duration;

use crate::caching::config::{Encoding, MemcacheStoreConfig};
use crate::caching::{BackingStoreError, CacheKey, StoreResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Stores entries on a set of memcache servers.
///
/// Entries are written without a server-side expiry. Instead, [`BackingStore::retrieve`]
/// compares the stored birthday against `max_age` and evicts entries that have gone stale.
///
/// The memcache client is blocking, so every call runs on tokio's blocking thread pool.
///
/// [`BackingStore::retrieve`]: super::BackingStore::retrieve
#[derive(Clone)]
pub struct MemcacheStore {
    servers: Vec<String>,
    encoding: Encoding,
    client: Arc<memcache::Client>,
}

impl std::fmt::Debug for MemcacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcacheStore")
            .field("servers", &self.servers)
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl MemcacheStore {
    pub async fn connect(config: MemcacheStoreConfig) -> StoreResult<Self> {
        if config.servers.is_empty() {
            return Err(BackingStoreError::Unavailable(
                "no memcache servers configured".into(),
            ));
        }

        let servers: Vec<String> = config.servers.iter().map(|s| server_url(s)).collect();
        let urls = servers.clone();
        let connect = tokio::task::spawn_blocking(move || {
            let client = memcache::Client::connect(urls)?;
            client.set_read_timeout(Some(IO_TIMEOUT))?;
            client.set_write_timeout(Some(IO_TIMEOUT))?;
            Ok::<_, memcache::MemcacheError>(client)
        });

        let client = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => return Err(BackingStoreError::Unavailable(join_error.to_string())),
            Err(_) => return Err(BackingStoreError::Timeout),
        };

        Ok(Self {
            servers,
            encoding: config.encoding,
            client: Arc::new(client),
        })
    }

    pub(super) fn encoding(&self) -> Encoding {
        self.encoding
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|err| BackingStoreError::Unavailable(err.to_string()))?
            .map_err(BackingStoreError::from)
    }

    pub(super) async fn exists(&self, key: &CacheKey) -> StoreResult<bool> {
        let key = key.remote_key();
        let value = self
            .run(move |client| client.get::<Vec<u8>>(&key))
            .await?;
        Ok(value.is_some())
    }

    pub(super) async fn retrieve(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let key = key.remote_key();
        self.run(move |client| client.get::<Vec<u8>>(&key)).await
    }

    pub(super) async fn store(&self, key: &CacheKey, contents: Vec<u8>) -> StoreResult<()> {
        let key = key.remote_key();
        self.run(move |client| client.set(&key, contents.as_slice(), 0))
            .await
    }

    /// Deletes an expired entry. Failures are only logged, the entry is treated as gone.
    pub(super) async fn evict(&self, key: &CacheKey) {
        let remote_key = key.remote_key();
        if let Err(err) = self
            .run(move |client| client.delete(&remote_key))
            .await
        {
            tracing::warn!(key = %key, error = %err, "Failed to evict expired memcache entry");
        }
    }
}

/// Turns a bare `host:port` into a `memcache://` URL, leaving full URLs alone.
fn server_url(server: &str) -> String {
    if server.contains("://") {
        server.to_owned()
    } else {
        format!("memcache://{server}")
    }
}
