use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::caching::config::{Encoding, FilesystemStoreConfig};
use crate::caching::{CacheKey, StoreResult};

/// Stores one file per cache key directly below a root directory.
///
/// The root is created on the first write. Files are written to a temporary file first and then
/// atomically moved into place, so concurrent readers never observe partial entries.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    config: FilesystemStoreConfig,
}

impl FilesystemStore {
    pub fn new(config: FilesystemStoreConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.path
    }

    pub(super) fn encoding(&self) -> Encoding {
        self.config.encoding
    }

    /// The absolute path of the file holding `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.config.path.join(key.file_name())
    }

    pub(super) async fn exists(&self, key: &CacheKey) -> StoreResult<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    pub(super) async fn retrieve(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        tracing::trace!("Reading cache entry from {}", path.display());
        match fs::read(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub(super) async fn store(&self, key: &CacheKey, contents: Vec<u8>) -> StoreResult<()> {
        let root = &self.config.path;
        create_root(root).await?;

        let temp_dir = root.join(".tmp");
        fs::create_dir_all(&temp_dir).await?;
        let temp_file = NamedTempFile::new_in(&temp_dir)?;
        let mut dest = File::from_std(temp_file.reopen()?);
        dest.write_all(&contents).await?;
        dest.flush().await?;

        temp_file
            .persist(self.path_for(key))
            .map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(unix)]
async fn create_root(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let path = path.to_owned();
    tokio::task::spawn_blocking(move || {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o766)
            .create(path)
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(not(unix))]
async fn create_root(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await
}
