//! Path to resource id cache.
//!
//! Canonical paths map to the resource id the catalog returned for them.
//! Entries expire after a fixed TTL so renamed files are picked up without
//! unbounded staleness. Concurrent writers for the same path store the same
//! value, so last write wins.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

/// Configuration for the resolve cache.
#[derive(Debug, Clone)]
pub struct ResolveCacheConfig {
    /// How long a lookup stays valid
    pub ttl: Duration,

    /// Maximum number of cached paths
    pub max_entries: usize,

    /// How often expired entries are swept
    pub cleanup_interval: Duration,
}

impl Default for ResolveCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 50_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

struct CachedResolution {
    resource_id: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct ResolveCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

pub struct ResolveCache {
    config: ResolveCacheConfig,
    entries: DashMap<PathBuf, CachedResolution>,
    stats: ResolveCacheStats,
}

impl ResolveCache {
    pub fn new(config: ResolveCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            stats: ResolveCacheStats::default(),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(ResolveCacheConfig {
            ttl,
            ..ResolveCacheConfig::default()
        })
    }

    pub fn config(&self) -> &ResolveCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &ResolveCacheStats {
        &self.stats
    }

    /// Cached resource id for a canonical path, if still fresh.
    pub fn get(&self, canonical: &Path) -> Option<u64> {
        let fresh = self
            .entries
            .get(canonical)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.resource_id);

        match fresh {
            Some(id) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(id)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.entries
                    .remove_if(canonical, |_, entry| Instant::now() >= entry.expires_at);
                None
            }
        }
    }

    pub fn insert(&self, canonical: PathBuf, resource_id: u64) {
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&canonical) {
            self.evict_oldest();
        }
        self.entries.insert(
            canonical,
            CachedResolution {
                resource_id,
                expires_at: Instant::now() + self.config.ttl,
            },
        );
    }

    pub fn invalidate(&self, canonical: &Path) {
        self.entries.remove(canonical);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Periodically sweep expired entries
pub fn spawn_cleanup_task(cache: Arc<ResolveCache>) {
    let interval = cache.config().cleanup_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup_expired();
            debug!(removed, remaining = cache.len(), "Resolve cache cleanup completed");
        }
    });

    info!(interval_secs = interval.as_secs(), "Resolve cache cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = ResolveCache::with_ttl(Duration::from_secs(60));
        let path = PathBuf::from("/srv/uploads/a.pdf");

        assert_eq!(cache.get(&path), None);
        cache.insert(path.clone(), 42);
        assert_eq!(cache.get(&path), Some(42));

        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_expiry() {
        let cache = ResolveCache::with_ttl(Duration::from_millis(0));
        let path = PathBuf::from("/srv/uploads/a.pdf");

        cache.insert(path.clone(), 42);
        assert_eq!(cache.get(&path), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = ResolveCache::with_ttl(Duration::from_millis(0));
        cache.insert(PathBuf::from("/a.pdf"), 1);
        cache.insert(PathBuf::from("/b.pdf"), 2);

        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let cache = ResolveCache::new(ResolveCacheConfig {
            max_entries: 2,
            ..ResolveCacheConfig::default()
        });
        cache.insert(PathBuf::from("/a.pdf"), 1);
        cache.insert(PathBuf::from("/b.pdf"), 2);
        cache.insert(PathBuf::from("/c.pdf"), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(Path::new("/c.pdf")), Some(3));
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(ResolveCache::with_ttl(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        cache.insert(PathBuf::from(format!("/f{}.pdf", i % 10)), i % 10);
                        let _ = cache.get(Path::new("/f0.pdf"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 10);
        assert_eq!(cache.get(Path::new("/f3.pdf")), Some(3));
    }
}
