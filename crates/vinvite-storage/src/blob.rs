//! Asynchronous blob store for processed artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Binary blob store keyed by content ID.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Reject keys that could escape the store directory.
fn validate_key(key: &str) -> StorageResult<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::invalid_key(key))
    }
}

/// Blob store backed by a directory, one file per key.
///
/// The directory is created lazily on first use; if that fails the store
/// reports itself unavailable on every call.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    opened: OnceCell<bool>,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            opened: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn open(&self) -> StorageResult<()> {
        let ok = *self
            .opened
            .get_or_init(|| async {
                match tokio::fs::create_dir_all(&self.root).await {
                    Ok(()) => {
                        debug!(root = %self.root.display(), "Opened blob store");
                        true
                    }
                    Err(e) => {
                        warn!(root = %self.root.display(), error = %e, "Blob store unavailable");
                        false
                    }
                }
            })
            .await;
        if ok {
            Ok(())
        } else {
            Err(StorageError::unavailable(format!(
                "cannot open blob directory {}",
                self.root.display()
            )))
        }
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.blob", key)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.open().await?;
        let path = self.path_for(key)?;
        let tmp = path.with_extension("blob.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.open().await?;
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.open().await?;
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory blob store.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable("memory blob store disabled"))
        }
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| StorageError::unavailable("blob store lock poisoned"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.check()?;
        self.lock()?.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.lock()?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.lock()?.remove(key);
        Ok(())
    }
}
