//! Path-addressed storage for PDF revisions

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Writes a file that must not exist yet
    async fn write_new(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Removes a file that was written but never promoted
    async fn discard(&self, path: &str) -> Result<()>;
}

/// Files under a root directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store paths are relative and may not climb out of the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(Error::ValidationError(format!("invalid store path: {:?}", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?).await?)
    }

    async fn write_new(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::PersistenceConflict(format!("{} already exists", path)));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.sync_all().await?;

        debug!("Wrote {} bytes to {}", bytes.len(), path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.resolve(path)?).await?)
    }

    async fn discard(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
