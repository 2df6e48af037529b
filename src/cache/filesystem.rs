//! Cache store keeping artifacts as plain files under a root directory.

use super::{CacheAppender, CacheError, CacheStore};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

/// On-disk cache rooted at a directory. Artifacts live at `<root>/<name>`.
#[derive(Debug, Clone)]
pub struct Filesystem {
    root: PathBuf,
}

impl Filesystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Filesystem { root: root.into() }
    }

    /// Resolves `name` to its artifact path. Names must be a single normal
    /// path component; anything that could climb out of the root is refused.
    fn artifact_path(&self, name: &str) -> Result<PathBuf, CacheError> {
        if name.is_empty() || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStore for Filesystem {
    type Reader = File;
    type Appender = FileAppender;

    async fn exists(&self, name: &str) -> bool {
        match self.artifact_path(name) {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    #[tracing_attributes::instrument]
    async fn open_read(&self, name: &str) -> Result<Self::Reader, CacheError> {
        let path = self.artifact_path(name)?;
        Ok(File::open(path).await?)
    }

    #[tracing_attributes::instrument]
    async fn open_append(&self, name: &str) -> Result<Self::Appender, CacheError> {
        let path = self.artifact_path(name)?;
        let file = OpenOptions::new().append(true).create(true).open(path).await?;
        Ok(FileAppender { file })
    }
}

/// Appender over a [`File`] opened in append mode.
#[derive(Debug)]
pub struct FileAppender {
    file: File,
}

#[async_trait]
impl CacheAppender for FileAppender {
    async fn append(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        Ok(())
    }
}
