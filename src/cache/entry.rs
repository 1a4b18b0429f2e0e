use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A cached value together with the metadata needed to decide liveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// Storage key, unique within the store's namespace
    pub key: String,
    /// Cached payload
    pub value: V,
    /// Write time in milliseconds since the Unix epoch
    pub written_at: i64,
    /// Validity window in milliseconds
    pub ttl_ms: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, written_at: i64, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            written_at,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// An entry is live iff `now - written_at <= ttl_ms`.
    ///
    /// A clock that moved backwards yields a negative age, which counts as live.
    pub fn is_live(&self, now_ms: i64) -> bool {
        let age = now_ms.saturating_sub(self.written_at);
        age <= 0 || (age as u64) <= self.ttl_ms
    }

    /// Last millisecond at which the entry is still live
    pub fn expires_at(&self) -> i64 {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        self.written_at.saturating_add(ttl)
    }
}

/// Source of "now" for TTL decisions
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations
///
/// Clones share the same underlying time, so a test can hand one clone to the
/// cache and advance the other.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
