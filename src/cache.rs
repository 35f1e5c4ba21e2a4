//! Bounded edge cache for verge.
//!
//! Provides a TTL-aware LRU store keyed by `(logical name, version)`.
//! Entries are immutable once inserted; a logical update lands under a new
//! version key instead of mutating in place. A disabled store absorbs every
//! operation as a no-op returning absence, so callers never branch on the
//! enabled flag themselves.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Identity under which an entry is cached.
///
/// Distinct versions of the same logical name never collide; purging works by
/// moving the current version forward so stale keys are simply never
/// addressed again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
    version: u64,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Logical resource name this key belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.name, self.version)
    }
}

/// A cached response entity with the validators needed for conditional and
/// range handling. Content is shared via `Arc` so hits never copy bytes.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Entity bytes.
    pub content: Arc<Vec<u8>>,
    /// MIME type.
    pub content_type: String,
    /// Entity tag, including quoting, exactly as the origin sent it.
    pub etag: Option<String>,
    /// Last-Modified header value in HTTP-date format.
    pub last_modified: Option<String>,
    /// Cache-Control header value.
    pub cache_control: Option<String>,
}

impl CacheEntry {
    pub fn new(content: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            content: Arc::new(content),
            content_type: content_type.into(),
            etag: None,
            last_modified: None,
            cache_control: None,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Entry plus its expiry clock; internal to the store.
struct Stored {
    entry: CacheEntry,
    expires_at: Instant,
}

/// Configuration for the edge cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; a disabled cache is a total no-op.
    pub enabled: bool,
    /// Maximum number of live entries.
    pub max_entries: usize,
    /// Maximum total bytes across all entries.
    pub max_bytes: u64,
    /// Entry time-to-live.
    #[serde(with = "crate::config::duration_serde")]
    pub ttl: Duration,
    /// When true, a hit slides the expiry clock forward by `ttl`.
    pub refresh_ttl_on_access: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            max_bytes: 256 * 1024 * 1024, // 256 MB
            ttl: Duration::from_secs(3600),
            refresh_ttl_on_access: true,
        }
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    /// Current number of live entries.
    pub size: usize,
    pub max_size: usize,
    /// Configured TTL in seconds.
    #[serde(rename = "ttl")]
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub bytes: u64,
    pub max_bytes: u64,
}

impl CacheStats {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Bounded TTL/LRU store for delivery entries.
///
/// Mutations are exclusive behind the lock; after any operation returns,
/// `size <= max_entries` and `bytes <= max_bytes` hold.
pub struct CacheStore {
    cache: RwLock<LruCache<CacheKey, Stored>>,
    config: CacheConfig,
    current_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl CacheStore {
    /// Create a new cache store.
    pub fn new(config: CacheConfig) -> Self {
        let max_entries = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: RwLock::new(LruCache::new(max_entries)),
            config,
            current_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Get an entry if present and unexpired, refreshing its recency.
    ///
    /// Expired entries are removed on access and reported as misses.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.config.enabled {
            return None;
        }

        let mut cache = self.cache.write().await;

        match cache.get_mut(key) {
            Some(stored) => {
                if Instant::now() >= stored.expires_at {
                    let size = stored.entry.size() as u64;
                    cache.pop(key);
                    self.current_bytes.fetch_sub(size, Ordering::Relaxed);
                    self.expired.fetch_add(1, Ordering::Relaxed);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }

                if self.config.refresh_ttl_on_access {
                    stored.expires_at = Instant::now() + self.config.ttl;
                }

                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(stored.entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite an entry, evicting LRU victims as needed.
    ///
    /// Atomic from the caller's perspective. Entries larger than the byte
    /// budget are silently not cached; the caller still serves them.
    pub async fn insert(&self, key: CacheKey, entry: CacheEntry) {
        if !self.config.enabled {
            return;
        }

        let entry_bytes = entry.size() as u64;
        if entry_bytes > self.config.max_bytes {
            return;
        }

        let mut cache = self.cache.write().await;

        // Replace an existing entry under the same key first so its bytes
        // are not counted twice.
        if let Some(old) = cache.pop(&key) {
            self.current_bytes
                .fetch_sub(old.entry.size() as u64, Ordering::Relaxed);
        }

        // Evict least-recently-used entries until both budgets fit. The
        // explicit loop keeps byte accounting exact; the inner LruCache
        // never evicts implicitly because we stay below its capacity.
        while cache.len() >= self.config.max_entries
            || self.current_bytes.load(Ordering::Relaxed) + entry_bytes > self.config.max_bytes
        {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    self.current_bytes
                        .fetch_sub(evicted.entry.size() as u64, Ordering::Relaxed);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        let stored = Stored {
            entry,
            expires_at: Instant::now() + self.config.ttl,
        };
        self.current_bytes.fetch_add(entry_bytes, Ordering::Relaxed);
        cache.put(key, stored);
    }

    /// Remove a single entry. Idempotent.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut cache = self.cache.write().await;
        match cache.pop(key) {
            Some(stored) => {
                self.current_bytes
                    .fetch_sub(stored.entry.size() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove every cached version of a logical name. Returns the number of
    /// entries removed.
    pub async fn remove_name(&self, name: &str) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let mut cache = self.cache.write().await;
        let to_remove: Vec<CacheKey> = cache
            .iter()
            .filter(|(key, _)| key.name() == name)
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in to_remove {
            if let Some(stored) = cache.pop(&key) {
                self.current_bytes
                    .fetch_sub(stored.entry.size() as u64, Ordering::Relaxed);
                removed += 1;
            }
        }

        removed
    }

    /// Clear all entries. Idempotent.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        self.current_bytes.store(0, Ordering::Relaxed);
    }

    /// Get a statistics snapshot.
    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;

        CacheStats {
            enabled: self.config.enabled,
            size: cache.len(),
            max_size: self.config.max_entries,
            ttl_secs: self.config.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            bytes: self.current_bytes.load(Ordering::Relaxed),
            max_bytes: self.config.max_bytes,
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Check if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
