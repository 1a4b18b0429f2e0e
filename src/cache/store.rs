//! Key/value store backends for the expiring cache
//!
//! `Store` is the seam between the cache and whatever persistence the platform
//! offers. Two backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local map, used for session state and tests
//! - [`FileStore`]: JSON file that survives restarts
//!
//! Backends report failures through [`StoreError`]; deciding what a failure
//! means is left to the caller.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Errors raised by store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous key/value store
#[async_trait]
pub trait Store<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    async fn put(&self, key: K, value: V) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &K) -> Result<(), StoreError>;

    async fn keys(&self) -> Result<Vec<K>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory store backed by a `HashMap`
///
/// Clones share the same map.
pub struct MemoryStore<K, V> {
    entries: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

#[async_trait]
impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: K, value: V) -> Result<(), StoreError> {
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// JSON-file-backed store keyed by strings
///
/// The file is loaded on first access and rewritten after every mutation
/// (temp file + rename, so a crash never leaves a half-written file behind).
/// A file that cannot be parsed surfaces as [`StoreError::Corrupted`] until it
/// is cleared.
pub struct FileStore<V> {
    path: PathBuf,
    state: Mutex<Option<HashMap<String, V>>>,
}

impl<V> FileStore<V> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<V> FileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn load(&self) -> Result<HashMap<String, V>, StoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(HashMap::new());
        }

        serde_json::from_slice(&data).map_err(|e| {
            StoreError::Corrupted(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn persist(&self, entries: &HashMap<String, V>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let data = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::Corrupted(format!("Failed to serialize entries: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), entries = entries.len(), "Persisted file store");
        Ok(())
    }

    async fn loaded<'a>(
        &self,
        guard: &'a mut Option<HashMap<String, V>>,
    ) -> Result<&'a mut HashMap<String, V>, StoreError> {
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        guard
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable(format!("{} not loaded", self.path.display())))
    }

    async fn read_entries<R>(&self, f: impl FnOnce(&HashMap<String, V>) -> R + Send) -> Result<R, StoreError> {
        let mut guard = self.state.lock().await;
        let entries = self.loaded(&mut guard).await?;
        Ok(f(entries))
    }

    /// Apply `f` to a copy of the map; the copy replaces the loaded map only
    /// once it has been persisted, so memory never runs ahead of the file.
    async fn update_entries(&self, f: impl FnOnce(&mut HashMap<String, V>) -> bool + Send) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let entries = self.loaded(&mut guard).await?;

        let mut next = entries.clone();
        if f(&mut next) {
            self.persist(&next).await?;
            *entries = next;
        }
        Ok(())
    }
}

#[async_trait]
impl<V> Store<String, V> for FileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &String) -> Result<Option<V>, StoreError> {
        self.read_entries(|entries| entries.get(key).cloned()).await
    }

    async fn put(&self, key: String, value: V) -> Result<(), StoreError> {
        self.update_entries(move |entries| {
            entries.insert(key, value);
            true
        })
        .await
    }

    async fn delete(&self, key: &String) -> Result<(), StoreError> {
        self.update_entries(|entries| entries.remove(key).is_some()).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.read_entries(|entries| entries.keys().cloned().collect()).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        // Clearing must also recover from a corrupted file, so skip the load.
        let mut guard = self.state.lock().await;
        let empty = HashMap::new();
        self.persist(&empty).await?;
        *guard = Some(empty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store: MemoryStore<String, i32> = MemoryStore::new();

        store.put("a".to_string(), 1).await.unwrap();
        store.put("b".to_string(), 2).await.unwrap();
        assert_eq!(store.get(&"a".to_string()).await.unwrap(), Some(1));
        assert_eq!(store.len().await, 2);

        store.delete(&"a".to_string()).await.unwrap();
        store.delete(&"a".to_string()).await.unwrap();
        assert_eq!(store.get(&"a".to_string()).await.unwrap(), None);

        store.clear().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_entries() {
        let store: MemoryStore<String, i32> = MemoryStore::new();
        let other = store.clone();

        store.put("k".to_string(), 9).await.unwrap();
        assert_eq!(other.get(&"k".to_string()).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let store: FileStore<Value> = FileStore::new(&path);
        store.put("SUBSCRIPTION".to_string(), json!({"premium": true})).await.unwrap();
        drop(store);

        let reopened: FileStore<Value> = FileStore::new(&path);
        assert_eq!(
            reopened.get(&"SUBSCRIPTION".to_string()).await.unwrap(),
            Some(json!({"premium": true}))
        );
        assert_eq!(reopened.keys().await.unwrap(), vec!["SUBSCRIPTION".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store: FileStore<Value> = FileStore::new(dir.path().join("absent.json"));

        assert_eq!(store.get(&"k".to_string()).await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_corrupted_file_reports_and_clear_recovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store: FileStore<Value> = FileStore::new(&path);
        let err = store.get(&"k".to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));

        store.clear().await.unwrap();
        assert_eq!(store.get(&"k".to_string()).await.unwrap(), None);
        store.put("k".to_string(), json!(1)).await.unwrap();
        assert_eq!(store.get(&"k".to_string()).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_file_store_delete_missing_key_does_not_fail() {
        let dir = TempDir::new().unwrap();
        let store: FileStore<Value> = FileStore::new(dir.path().join("cache.json"));

        store.delete(&"nope".to_string()).await.unwrap();
        assert!(!dir.path().join("cache.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_failed_persist_leaves_entries_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let store: FileStore<Value> = FileStore::new(&path);
        store.put("SUBSCRIPTION".to_string(), json!(true)).await.unwrap();

        // A directory squatting on the temp path makes the rewrite fail
        let tmp = path.with_extension("tmp");
        std::fs::create_dir(&tmp).unwrap();

        assert!(store.delete(&"SUBSCRIPTION".to_string()).await.is_err());
        assert!(store.put("other".to_string(), json!(1)).await.is_err());
        assert_eq!(store.get(&"SUBSCRIPTION".to_string()).await.unwrap(), Some(json!(true)));
        assert_eq!(store.get(&"other".to_string()).await.unwrap(), None);

        std::fs::remove_dir(&tmp).unwrap();
        let reopened: FileStore<Value> = FileStore::new(&path);
        assert_eq!(reopened.get(&"SUBSCRIPTION".to_string()).await.unwrap(), Some(json!(true)));
        assert_eq!(reopened.get(&"other".to_string()).await.unwrap(), None);
    }
}
