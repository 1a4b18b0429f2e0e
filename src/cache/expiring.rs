//! TTL-aware cache facade over the persistent stores
//!
//! ```rust
//! use std::time::Duration;
//! use ownbite_access::cache::{CacheKey, ExpiringCache};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = ExpiringCache::in_memory().scoped("user-123");
//!
//! cache.set(CacheKey::Subscription, &true, Duration::from_secs(60)).await;
//! assert_eq!(cache.get::<bool>(CacheKey::Subscription).await, Some(true));
//!
//! cache.clear_namespace(CacheKey::user_scoped()).await;
//! assert_eq!(cache.get::<bool>(CacheKey::Subscription).await, None);
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, Clock, SystemClock};
use super::keys::SIGNOUT_COMPANION_KEYS;
use super::store::{FileStore, MemoryStore, Store, StoreError};
use crate::observability::metrics::record_cache_lookup;

/// Store holding TTL-stamped cache entries
pub type EntryStore = Arc<dyn Store<String, CacheEntry<Value>>>;

/// Store holding raw key/value state (tokens, flags)
pub type StateStore = Arc<dyn Store<String, Value>>;

/// The three stores the cache manages
#[derive(Clone)]
pub struct CacheStores {
    /// Persistent TTL-stamped cache entries
    pub entries: EntryStore,
    /// Persistent raw state such as auth tokens and referral flags
    pub local: StateStore,
    /// Ephemeral per-session state
    pub session: StateStore,
}

impl CacheStores {
    pub fn in_memory() -> Self {
        Self {
            entries: Arc::new(MemoryStore::new()),
            local: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
        }
    }

    /// File-backed entries and local state under `dir`; session state stays in memory
    pub fn file_backed(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            entries: Arc::new(FileStore::new(dir.join("cache.json"))),
            local: Arc::new(FileStore::new(dir.join("local.json"))),
            session: Arc::new(MemoryStore::new()),
        }
    }
}

/// Which raw state store an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateScope {
    Local,
    Session,
}

/// Cache counters for monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found expired and evicted on read
    pub expired: u64,
    /// Entries whose payload no longer matched the requested type
    pub corrupted: u64,
    /// Backend failures swallowed by the cache
    pub storage_errors: u64,
    /// Hit rate as percentage (0.0 - 100.0)
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn calculate_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Expiring key/value cache
///
/// Cloning is cheap and clones share stores, clock and counters.
/// [`ExpiringCache::scoped`] derives a view whose keys are prefixed with a
/// namespace, which is how per-user entries are kept apart on the server.
///
/// No operation returns an error: storage failures are logged and treated as
/// a cache miss.
#[derive(Clone)]
pub struct ExpiringCache {
    stores: CacheStores,
    clock: Arc<dyn Clock>,
    namespace: Option<String>,
    companion_keys: Arc<Vec<String>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl ExpiringCache {
    pub fn new(stores: CacheStores) -> Self {
        Self {
            stores,
            clock: Arc::new(SystemClock),
            namespace: None,
            companion_keys: Arc::new(SIGNOUT_COMPANION_KEYS.iter().map(|k| k.to_string()).collect()),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(CacheStores::in_memory())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the local-state keys removed by [`ExpiringCache::clear_namespace`]
    pub fn with_companion_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.companion_keys = Arc::new(keys.into_iter().map(Into::into).collect());
        self
    }

    /// View of this cache whose keys live under `namespace`
    pub fn scoped(&self, namespace: impl Into<String>) -> Self {
        let mut scoped = self.clone();
        scoped.namespace = Some(namespace.into());
        scoped
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn storage_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    fn state_store(&self, scope: StateScope) -> &StateStore {
        match scope {
            StateScope::Local => &self.stores.local,
            StateScope::Session => &self.stores.session,
        }
    }

    async fn note_storage_error(&self, operation: &'static str, key: &str, error: &StoreError) {
        warn!(operation, key = %key, error = %error, "Cache storage failure ignored");
        self.stats.write().await.storage_errors += 1;
        record_cache_lookup("error");
    }

    async fn note_miss(&self, outcome: &'static str) {
        let mut stats = self.stats.write().await;
        stats.misses += 1;
        match outcome {
            "expired" => stats.expired += 1,
            "corrupted" => stats.corrupted += 1,
            _ => {}
        }
        record_cache_lookup(outcome);
    }

    /// Store `value` under `key`, live for `ttl` from now
    pub async fn set<T: Serialize + ?Sized>(&self, key: impl AsRef<str>, value: &T, ttl: Duration) {
        let key = self.storage_key(key.as_ref());

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache value could not be serialized; skipping write");
                return;
            }
        };

        let entry = CacheEntry::new(key.clone(), value, self.clock.now_ms(), ttl);
        if let Err(e) = self.stores.entries.put(key.clone(), entry).await {
            self.note_storage_error("set", &key, &e).await;
            return;
        }

        debug!(key = %key, ttl_ms = %ttl.as_millis(), "Cache entry written");
    }

    /// Live value under `key`, if any
    ///
    /// Expired entries and entries that no longer decode as `T` are deleted.
    pub async fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> Option<T> {
        let key = self.storage_key(key.as_ref());

        let entry = match self.stores.entries.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.note_miss("miss").await;
                return None;
            }
            Err(e) => {
                self.note_storage_error("get", &key, &e).await;
                self.stats.write().await.misses += 1;
                return None;
            }
        };

        let now = self.clock.now_ms();
        if !entry.is_live(now) {
            debug!(key = %key, expired_at = entry.expires_at(), now, "Cache entry expired");
            self.evict(&key).await;
            self.note_miss("expired").await;
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                self.stats.write().await.hits += 1;
                record_cache_lookup("hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry corrupted; evicting");
                self.evict(&key).await;
                self.note_miss("corrupted").await;
                None
            }
        }
    }

    async fn evict(&self, storage_key: &String) {
        if let Err(e) = self.stores.entries.delete(storage_key).await {
            self.note_storage_error("evict", storage_key, &e).await;
        }
    }

    /// Delete a single entry; removing an absent key is a no-op
    pub async fn remove(&self, key: impl AsRef<str>) {
        let key = self.storage_key(key.as_ref());
        self.evict(&key).await;
    }

    /// Delete every key of `store` under `prefix`, returning how many went
    async fn purge_prefix<V>(&self, store: &dyn Store<String, V>, prefix: &str, operation: &'static str) -> usize
    where
        V: Send + Sync + 'static,
    {
        let keys = match store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.note_storage_error(operation, prefix, &e).await;
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(prefix)) {
            match store.delete(key).await {
                Ok(()) => removed += 1,
                Err(e) => self.note_storage_error(operation, key, &e).await,
            }
        }
        removed
    }

    /// Session state visible to this view; a scoped view only owns its prefix
    async fn clear_session(&self) {
        match &self.namespace {
            Some(ns) => {
                self.purge_prefix(self.stores.session.as_ref(), &format!("{}:", ns), "clear_namespace")
                    .await;
            }
            None => {
                if let Err(e) = self.stores.session.clear().await {
                    self.note_storage_error("clear_namespace", "<session>", &e).await;
                }
            }
        }
    }

    /// Sign-out purge
    ///
    /// Deletes `keys` from this namespace, the companion local-state keys
    /// (auth tokens, referral flags) and the ephemeral session state. An
    /// unscoped cache drops the whole session store.
    pub async fn clear_namespace<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = 0usize;
        for key in keys {
            self.remove(key).await;
            removed += 1;
        }

        for companion in self.companion_keys.iter() {
            let key = self.storage_key(companion);
            if let Err(e) = self.stores.local.delete(&key).await {
                self.note_storage_error("clear_namespace", &key, &e).await;
            }
        }

        self.clear_session().await;

        debug!(
            namespace = ?self.namespace,
            cache_keys = removed,
            companion_keys = self.companion_keys.len(),
            "Cleared cache namespace"
        );
    }

    /// Troubleshooting reset limited to this view's namespace
    ///
    /// Removes every cache entry and every piece of local and session state
    /// under the namespace. An unscoped cache falls back to [`ExpiringCache::clear_all`].
    pub async fn clear_scope(&self) {
        let Some(ns) = &self.namespace else {
            self.clear_all().await;
            return;
        };

        let prefix = format!("{}:", ns);
        let entries = self.purge_prefix(self.stores.entries.as_ref(), &prefix, "clear_scope").await;
        let local = self.purge_prefix(self.stores.local.as_ref(), &prefix, "clear_scope").await;
        let session = self.purge_prefix(self.stores.session.as_ref(), &prefix, "clear_scope").await;

        info!(namespace = %ns, entries, local, session, "Cache namespace reset");
    }

    /// Troubleshooting reset: empties every store, across all namespaces
    pub async fn clear_all(&self) {
        if let Err(e) = self.stores.entries.clear().await {
            self.note_storage_error("clear_all", "<entries>", &e).await;
        }
        if let Err(e) = self.stores.local.clear().await {
            self.note_storage_error("clear_all", "<local>", &e).await;
        }
        if let Err(e) = self.stores.session.clear().await {
            self.note_storage_error("clear_all", "<session>", &e).await;
        }

        warn!("All cache and local state cleared");
    }

    /// Write raw (non-expiring) state
    pub async fn put_state(&self, scope: StateScope, key: &str, value: Value) {
        let key = self.storage_key(key);
        if let Err(e) = self.state_store(scope).put(key.clone(), value).await {
            self.note_storage_error("put_state", &key, &e).await;
        }
    }

    /// Read raw state
    pub async fn state(&self, scope: StateScope, key: &str) -> Option<Value> {
        let key = self.storage_key(key);
        match self.state_store(scope).get(&key).await {
            Ok(value) => value,
            Err(e) => {
                self.note_storage_error("state", &key, &e).await;
                None
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.hit_rate = CacheStats::calculate_hit_rate(stats.hits, stats.misses);
        stats
    }
}
