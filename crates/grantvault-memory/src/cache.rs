//! Local TTL cache for grant snapshots.
//!
//! Single-node stand-in for the distributed cache. Entries carry their own
//! TTL and behave as absent once it has elapsed; expired entries are
//! dropped lazily on read or by [`LocalGrantCache::cleanup_expired`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use grantvault_core::GrantResult;
use grantvault_core::storage::GrantCache;
use tracing::debug;

/// Snapshot cache counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Entries currently held, expired ones not yet evicted included.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped after their TTL elapsed.
    pub evictions: u64,
}

impl CacheStats {
    /// Hits as a percentage of all reads; zero before the first read.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            reads => self.hits as f64 * 100.0 / reads as f64,
        }
    }
}

#[derive(Clone, Debug)]
struct CachedEntry {
    data: Arc<Vec<u8>>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// In-process [`GrantCache`] backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct LocalGrantCache {
    entries: DashMap<String, CachedEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalGrantCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry.
    ///
    /// # Returns
    ///
    /// The number of entries evicted.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "expired grant snapshots evicted");
        }
        evicted
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl GrantCache for LocalGrantCache {
    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> GrantResult<()> {
        self.entries.insert(
            key.to_string(),
            CachedEntry::new(value, Duration::from_secs(ttl_secs)),
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> GrantResult<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.data.as_ref().clone()));
            }
            // Remove expired entry
            drop(entry);
            if self.entries.remove_if(key, |_, e| e.is_expired()).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn remove(&self, key: &str) -> GrantResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}
