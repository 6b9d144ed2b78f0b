//! Bounded, cost-accounted in-memory cache.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::config::CacheConfig;
use crate::image_data::CachedImage;
use crate::key::CacheKey;

struct Inner {
    lru: LruCache<CacheKey, CachedImage>,
    total_pixel_cost: u64,
    max_pixel_cost: u64,
}

/// A memory-bounded cache of decoded images. Evicts least-recently-used
/// entries whenever either the entry count or the total pixel cost exceeds
/// its configured limit. Also evicts everything on a memory-pressure signal
/// (see [`MemoryCache::handle_memory_pressure`]).
pub struct MemoryCache {
    inner: Mutex<Inner>,
    enabled: bool,
}

/// Count limit of `0` is treated as "unbounded count, bounded by pixel cost only".
const UNBOUNDED_COUNT: usize = usize::MAX;

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let count_limit = if config.max_memory_count_limit == 0 {
            UNBOUNDED_COUNT
        } else {
            config.max_memory_count_limit as usize
        };
        let capacity = NonZeroUsize::new(count_limit).unwrap_or(NonZeroUsize::MAX);

        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::new(capacity),
                total_pixel_cost: 0,
                max_pixel_cost: config.max_memory_cost,
            }),
            enabled: config.should_cache_images_in_memory,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        inner.lru.get(key).cloned()
    }

    /// Reads without promoting the entry's recency (used for inspection/stats).
    pub fn peek(&self, key: &CacheKey) -> Option<CachedImage> {
        let inner = self.inner.lock();
        inner.lru.peek(key).cloned()
    }

    pub fn put(&self, key: CacheKey, image: CachedImage) {
        if !self.enabled {
            return;
        }
        let cost = image.pixel_cost();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.lru.peek(&key) {
            inner.total_pixel_cost -= old.pixel_cost();
        }
        inner.total_pixel_cost += cost;
        if let Some((_, evicted)) = inner.lru.push(key, image) {
            inner.total_pixel_cost -= evicted.pixel_cost();
        }

        Self::evict_over_cost(&mut inner);
    }

    pub fn remove(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.lru.pop(key) {
            inner.total_pixel_cost -= removed.pixel_cost();
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.total_pixel_cost = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_pixel_cost(&self) -> u64 {
        self.inner.lock().total_pixel_cost
    }

    /// Evicts everything. Wired up to the host runtime's memory-pressure
    /// notification hook.
    pub fn handle_memory_pressure(&self) {
        tracing::warn!("memory pressure signal received, clearing memory cache");
        self.clear();
    }

    fn evict_over_cost(inner: &mut Inner) {
        if inner.max_pixel_cost == 0 {
            return;
        }
        while inner.total_pixel_cost > inner.max_pixel_cost {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => inner.total_pixel_cost -= evicted.pixel_cost(),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;

    fn image(w: u32, h: u32) -> CachedImage {
        let rgba = vec![0u8; (w * h * 4) as usize];
        CachedImage::from_rgba8(&rgba, (w, h), Format::Png).unwrap()
    }

    fn config_with(max_cost: u64, count_limit: u32) -> CacheConfig {
        CacheConfig {
            max_memory_cost: max_cost,
            max_memory_count_limit: count_limit,
            ..Default::default()
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let key = CacheKey::new("a");
        cache.put(key.clone(), image(4, 4));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn miss_returns_none() {
        let cache = MemoryCache::new(&CacheConfig::default());
        assert!(cache.get(&CacheKey::new("missing")).is_none());
    }

    #[test]
    fn evicts_lru_when_pixel_cost_exceeded() {
        // Each image costs 100 px; budget for 2.5 of them
        let cache = MemoryCache::new(&config_with(250, 0));
        cache.put(CacheKey::new("a"), image(10, 10));
        cache.put(CacheKey::new("b"), image(10, 10));
        // `a` is now the least-recently-used
        cache.put(CacheKey::new("c"), image(10, 10));

        assert!(cache.get(&CacheKey::new("a")).is_none(), "a should be evicted");
        assert!(cache.get(&CacheKey::new("b")).is_some());
        assert!(cache.get(&CacheKey::new("c")).is_some());
        assert!(cache.total_pixel_cost() <= 250);
    }

    #[test]
    fn evicts_by_count_limit() {
        let cache = MemoryCache::new(&config_with(0, 2));
        cache.put(CacheKey::new("a"), image(1, 1));
        cache.put(CacheKey::new("b"), image(1, 1));
        cache.put(CacheKey::new("c"), image(1, 1));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new("a")).is_none());
    }

    #[test]
    fn peek_does_not_promote_recency() {
        let cache = MemoryCache::new(&config_with(0, 2));
        cache.put(CacheKey::new("a"), image(1, 1));
        cache.put(CacheKey::new("b"), image(1, 1));
        // peeking "a" should not save it from eviction
        let _ = cache.peek(&CacheKey::new("a"));
        cache.put(CacheKey::new("c"), image(1, 1));
        assert!(cache.get(&CacheKey::new("a")).is_none());
    }

    #[test]
    fn disabled_cache_never_stores() {
        let config = CacheConfig {
            should_cache_images_in_memory: false,
            ..Default::default()
        };
        let cache = MemoryCache::new(&config);
        cache.put(CacheKey::new("a"), image(1, 1));
        assert!(cache.get(&CacheKey::new("a")).is_none());
    }

    #[test]
    fn memory_pressure_clears_cache() {
        let cache = MemoryCache::new(&CacheConfig::default());
        cache.put(CacheKey::new("a"), image(1, 1));
        cache.handle_memory_pressure();
        assert!(cache.is_empty());
    }
}
