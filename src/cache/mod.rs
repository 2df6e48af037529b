//! The filename-addressed transfer cache.
//!
//! Cache membership is decided by presence alone: a file exists under the
//! cache root, or it does not. Nothing is validated, evicted or expired, so
//! an interrupted recording leaves a partial artifact that will be served
//! on the next request for the same name.

pub mod filesystem;

pub use filesystem::Filesystem;

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Errors raised by a cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The name would resolve outside the cache root (or is unusable as a
    /// single path component) and was refused.
    #[error("invalid cache filename: {0:?}")]
    InvalidName(String),
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A sink for recording one transfer into the cache.
#[async_trait]
pub trait CacheAppender: Debug + Send {
    /// Appends `bytes` to the artifact. The bytes have reached the
    /// operating system when this returns, so an interrupted transfer
    /// leaves everything appended so far on disk.
    async fn append(&mut self, bytes: &[u8]) -> Result<(), CacheError>;
}

/// The storage seam of the proxy: maps bare filenames to on-disk artifacts.
///
/// Write-allocate on miss, read-through on hit. The session layer treats
/// every error from this trait as a reason to fall back to plain splicing,
/// never as a reason to abort a transfer.
#[async_trait]
pub trait CacheStore: Debug + Send + Sync {
    type Reader: AsyncRead + Debug + Send + Unpin;
    type Appender: CacheAppender;

    /// Whether an artifact for `name` is present. Presence is the sole
    /// membership signal; size and content are not inspected.
    async fn exists(&self, name: &str) -> bool;

    /// Opens the artifact for sequential reading.
    async fn open_read(&self, name: &str) -> Result<Self::Reader, CacheError>;

    /// Opens the artifact for appending, creating it if absent.
    async fn open_append(&self, name: &str) -> Result<Self::Appender, CacheError>;
}
