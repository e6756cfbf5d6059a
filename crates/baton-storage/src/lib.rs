//! Artifact store backends.
//!
//! An artifact is a named, single-file bundle in a remote (or remote-like)
//! store. Chunk blobs, checkpoint manifests, and final packages are all
//! artifacts. The store is a shared external resource: `delete` is idempotent
//! and tolerates missing artifacts, and retention is advisory metadata only.

pub mod local_store;
pub mod rest_store;
pub mod retry;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local_store::LocalStore;
pub use rest_store::RestStore;
pub use retry::upload_with_retry;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: '{0}'")]
    NotFound(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[source] Box<ureq::Error>),

    #[error("{0}")]
    Other(String),
}

impl From<ureq::Error> for StoreError {
    fn from(value: ureq::Error) -> Self {
        StoreError::Http(Box::new(value))
    }
}

impl StoreError {
    /// Whether the error is worth another upload attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::NotFound(_) | StoreError::InvalidName(_))
    }
}

/// Remote artifact store.
///
/// Upload/download move whole files; the caller owns local cleanup of the
/// source after a successful upload.
pub trait BlobStore: Send + Sync {
    /// Upload `file` as the single member of the artifact `name`, replacing
    /// any previous artifact under that name. `retention_days` is advisory.
    fn upload(&self, name: &str, file: &Path, retention_days: Option<u32>) -> Result<()>;

    /// Download the artifact's file into `dest_dir`, returning its path.
    fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Delete the artifact. Succeeds if it does not exist.
    fn delete(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;
}

/// Retry settings for artifact uploads: bounded attempts, fixed delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Build a store from a URL: `http(s)://` selects the REST store, `file://`
/// or a bare path the local directory store.
pub fn store_from_url(url: &str, token: Option<&str>) -> Result<Box<dyn BlobStore>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(RestStore::new(url, token)))
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(Box::new(LocalStore::new(Path::new(path))?))
    }
}

/// Reject artifact names that could escape the store root or collide with
/// path separators. Names are flat identifiers like `nightly-vol001`.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty".into()));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
    {
        return Err(StoreError::InvalidName(format!(
            "'{name}' contains path separators or control characters"
        )));
    }
    if name == "." || name == ".." {
        return Err(StoreError::InvalidName(format!("'{name}'")));
    }
    Ok(())
}
