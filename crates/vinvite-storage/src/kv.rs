//! Small synchronous key-value store.
//!
//! Holds short JSON strings: cache metadata, the rate-limit counter and the
//! form cache. Two backends are provided: a JSON file on disk and an
//! in-memory map for tests and ephemeral sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Synchronous string key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// JSON helpers on top of any [`KvStore`].
pub trait KvStoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>>;

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()>;
}

impl<S: KvStore + ?Sized> KvStoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

fn poisoned() -> StorageError {
    StorageError::unavailable("store lock poisoned")
}

/// In-memory store. Can be switched off to simulate unavailable storage.
#[derive(Debug)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
    available: AtomicBool,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// A store whose every operation fails.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable("memory store disabled"))
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check()?;
        Ok(self.entries.lock().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        self.entries
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.entries.lock().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

/// Key-value store persisted as a single JSON object on disk.
///
/// The file is read on first access and rewritten atomically (temp file +
/// rename) on every mutation.
#[derive(Debug)]
pub struct JsonFileKvStore {
    path: PathBuf,
    entries: Mutex<Option<HashMap<String, String>>>,
}

impl JsonFileKvStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<HashMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = entries.len(), "Persisted key-value store");
        Ok(())
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> (R, bool),
    ) -> StorageResult<R> {
        let mut guard = self.entries.lock().map_err(|_| poisoned())?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let entries = guard.get_or_insert_with(HashMap::new);
        let (result, dirty) = f(entries);
        if dirty {
            self.persist(entries)?;
        }
        Ok(result)
    }
}

impl KvStore for JsonFileKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_entries(|entries| (entries.get(key).cloned(), false))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
            ((), true)
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.with_entries(|entries| {
            let existed = entries.remove(key).is_some();
            ((), existed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_store_unavailable() {
        let store = MemoryKvStore::unavailable();
        assert!(store.get("a").is_err());
        assert!(store.set("a", "1").is_err());

        store.set_available(true);
        assert!(store.set("a", "1").is_ok());
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryKvStore::new();
        store.set_json("n", &vec![1, 2, 3]).unwrap();
        let back: Option<Vec<i32>> = store.get_json("n").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        store.set("bad", "{not json").unwrap();
        assert!(store.get_json::<Vec<i32>>("bad").is_err());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileKvStore::new(&path);
        store.set("rate-limit", "{\"count\":1}").unwrap();
        store.set("form-cache", "{}").unwrap();
        store.remove("form-cache").unwrap();

        let reopened = JsonFileKvStore::new(&path);
        assert_eq!(
            reopened.get("rate-limit").unwrap().as_deref(),
            Some("{\"count\":1}")
        );
        assert_eq!(reopened.get("form-cache").unwrap(), None);
    }

    #[test]
    fn test_file_store_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileKvStore::new(&path);
        assert!(store.get("x").is_err());
    }
}
