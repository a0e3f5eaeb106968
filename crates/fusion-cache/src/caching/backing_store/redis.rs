use std::fmt;
use std::time::Duration;

use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

use crate::caching::config::RedisStoreConfig;
use crate::caching::{BackingStoreError, CacheKey, StoreResult};

const URL_SCHEMES: &[&str] = &["redis://", "rediss://", "redis+unix://", "unix://"];

/// Stores entries in Redis with a server-side expiry of `max_age`.
///
/// Connections are pooled and created lazily, so constructing the store never touches the
/// network.
#[derive(Clone)]
pub struct RedisStore {
    url: String,
    pool: Pool,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisStore {
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        if !URL_SCHEMES.iter().any(|scheme| config.url.starts_with(scheme)) {
            return Err(BackingStoreError::Unavailable(format!(
                "invalid redis connection string: {}",
                config.url
            )));
        }

        let pool = Config::from_url(config.url.as_str())
            .builder()
            .map_err(|err| BackingStoreError::Unavailable(err.to_string()))?
            .max_size(config.pool_size.max(1))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| BackingStoreError::Unavailable(err.to_string()))?;

        Ok(Self {
            url: config.url,
            pool,
        })
    }

    async fn connection(&self) -> StoreResult<Connection> {
        Ok(self.pool.get().await?)
    }

    pub(super) async fn exists(&self, key: &CacheKey) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        Ok(conn.exists(key.remote_key()).await?)
    }

    pub(super) async fn retrieve(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key.remote_key()).await?)
    }

    /// Writes `contents` with `SETEX`, letting Redis drop the entry once it turns stale.
    pub(super) async fn store(
        &self,
        key: &CacheKey,
        contents: Vec<u8>,
        max_age: Duration,
    ) -> StoreResult<()> {
        // SETEX rejects an expiry of zero
        let seconds = max_age.as_secs().max(1);
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key.remote_key(), contents, seconds)
            .await?;
        Ok(())
    }
}
