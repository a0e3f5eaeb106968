use std::io;

use thiserror::Error;

/// An error talking to a backing store.
///
/// Only [`KeyNotFound`](Self::KeyNotFound) is ever returned by the
/// [`BackingStore`](super::BackingStore) facade. Every other variant is logged and downgraded to
/// "no value available", so that a broken backing store behaves like an empty one.
#[derive(Debug, Error)]
pub enum BackingStoreError {
    /// The key was never stored, has expired, or storing it failed previously.
    #[error("key not found")]
    KeyNotFound,
    /// The remote substrate could not be reached or returned an error.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer in time.
    #[error("backing store timed out")]
    Timeout,
    /// An entry could not be encoded or a stored entry could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Reading or writing the local filesystem failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl BackingStoreError {
    /// A short tag for metrics.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::KeyNotFound => "not-found",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for BackingStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BackingStoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for BackingStoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for BackingStoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<memcache::MemcacheError> for BackingStoreError {
    fn from(err: memcache::MemcacheError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// The result of talking to a backing store.
pub type StoreResult<T> = Result<T, BackingStoreError>;
