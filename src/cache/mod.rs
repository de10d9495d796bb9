//! Keyed time-to-live cache for manager API responses.
//!
//! Entries carry an absolute expiry (`Instant`, so wall-clock jumps cannot
//! resurrect stale data) and are treated as immutable snapshots: values are
//! handed out as `Arc<T>` and must not be mutated by callers. Expiry is
//! checked on every `get`; a periodic [`TtlCache::sweep`] bounds memory by
//! dropping entries that expired without being read again.
//!
//! A `get` on a missing or expired key is not an error, just a miss.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

type Stored = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: Stored,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total entries held, including not-yet-swept expired ones.
    pub size: usize,
    /// Entries that would still be served.
    pub active: usize,
    /// Entries past their expiry, awaiting sweep.
    pub expired: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe TTL cache keyed by opaque strings.
///
/// Readers proceed concurrently; writers take the lock briefly. Values are
/// stored type-erased so one cache instance can back every endpoint; the
/// typed [`TtlCache::get`] downcasts on the way out.
pub struct TtlCache {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        TtlCache {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Retrieves a value if present, unexpired, and of the requested type.
    ///
    /// An expired entry is removed eagerly and counted as a miss. A type
    /// mismatch (same key cached with a different type) also counts as a
    /// miss; that indicates a key-construction bug upstream, so it is not
    /// silently served.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let now = Instant::now();

        let expired = {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if entry.is_expired(now) => true,
                Some(entry) => {
                    let hit = Arc::clone(&entry.value).downcast::<T>().ok();
                    if hit.is_some() {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                    }
                    return hit;
                }
            }
        };

        if expired {
            let mut entries = self.entries.write().expect("cache lock poisoned");
            // Re-check under the write lock: a concurrent put may have
            // refreshed the entry between the two lock scopes.
            if let Some(entry) = entries.get(key) {
                if entry.is_expired(Instant::now()) {
                    entries.remove(key);
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a value with the given TTL (or the cache default).
    pub fn put<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        self.put_arc(key, Arc::new(value), ttl);
    }

    /// Stores an already-shared value without re-wrapping it, so the caller
    /// and the cache hand out the same allocation.
    pub fn put_arc<T: Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        value: Arc<T>,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(key.into(), entry);
    }

    /// Removes one key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.remove(key).is_some()
    }

    /// Removes every key starting with `prefix`. Returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Drops all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.entries.write().expect("cache lock poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().expect("cache lock poisoned");
        let expired = entries.values().filter(|e| e.is_expired(now)).count();
        CacheStats {
            size: entries.len(),
            active: entries.len() - expired,
            expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
