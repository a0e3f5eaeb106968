use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Operation names longer than this are truncated in file names and remote keys.
const MAX_NAME_LEN: usize = 64;

/// Identifies one cacheable call: the operation plus all of its arguments.
///
/// Equality and hashing only consider the SHA-256 hash of the human-readable metadata.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    operation: Arc<str>,
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote_key())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Starts building a key for the given operation.
    pub fn builder(operation: impl Into<String>) -> CacheKeyBuilder {
        let operation = operation.into();
        let metadata = format!("operation: {operation}\n");
        CacheKeyBuilder {
            operation,
            metadata,
            kwargs: BTreeMap::new(),
        }
    }

    /// A key for an operation that takes no arguments.
    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self::builder(operation).build()
    }

    /// The name of the operation this key belongs to.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Hex-formatted SHA-256 hash of the metadata.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// The file name used by the filesystem backing store: `.<operation>-<hash>_cache`.
    pub fn file_name(&self) -> String {
        format!(
            ".{}-{}_cache",
            safe_path_segment(&self.operation),
            self.hash_hex()
        )
    }

    /// The key used by network backing stores: `<operation>:<hash>`.
    ///
    /// This never contains whitespace or control characters, which memcache rejects.
    pub fn remote_key(&self) -> String {
        format!("{}:{}", safe_path_segment(&self.operation), self.hash_hex())
    }
}

/// A builder for [`CacheKey`]s.
///
/// Positional arguments are recorded in call order, keyword arguments are sorted by name so
/// that equivalent calls produce the same key. Arguments are rendered as JSON.
///
/// The builder also implements [`fmt::Write`] to add free-form metadata lines.
#[derive(Debug)]
pub struct CacheKeyBuilder {
    operation: String,
    metadata: String,
    kwargs: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Appends a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        let rendered = render(value);
        writeln!(self.metadata, "arg: {rendered}").unwrap();
        self
    }

    /// Records a keyword argument. Later values for the same name replace earlier ones.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.kwargs.insert(name.to_owned(), render(value));
        self
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let Self {
            operation,
            mut metadata,
            kwargs,
        } = self;
        for (name, value) in &kwargs {
            writeln!(metadata, "kwarg {name}: {value}").unwrap();
        }

        let hash = Sha256::digest(&metadata);
        CacheKey {
            operation: operation.into(),
            metadata: metadata.into(),
            hash: hash.into(),
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}

fn render<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        tracing::error!(error = %err, "Failed to render cache key argument");
        format!("<unrenderable: {err}>")
    })
}

/// Protect against:
/// * ".."
/// * absolute paths
/// * ":" (not a threat on POSIX filesystems, but confuses OS X Finder)
/// * whitespace (rejected by memcache keys)
fn safe_path_segment(s: &str) -> String {
    s.chars()
        .take(MAX_NAME_LEN)
        .map(|c| match c {
            '.' | '/' | '\\' | ':' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}
