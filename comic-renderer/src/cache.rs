//! Decoded image cache.
//!
//! Exports decode every placed image; the cache keeps recent decodes so a
//! second export of the same collection only fetches what changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::decode::{DecodedImage, DecodedImages};

#[derive(Debug)]
struct CacheEntry {
    image: Arc<DecodedImage>,
    last_accessed: Instant,
    size_bytes: usize,
}

/// Limits for [`ImageCache`].
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    /// Maximum total pixel bytes.
    pub max_size_bytes: usize,
    /// Entries idle longer than this are dropped on maintenance.
    pub max_age: Duration,
    /// Maximum number of entries.
    pub max_entries: usize,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 256 * 1024 * 1024,
            max_age: Duration::from_secs(300),
            max_entries: 500,
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries evicted for size, count or age.
    pub evictions: u64,
    /// Total bytes inserted.
    pub bytes_loaded: u64,
}

/// LRU cache of decoded images keyed by library name.
#[derive(Debug)]
pub struct ImageCache {
    entries: HashMap<String, CacheEntry>,
    config: ImageCacheConfig,
    current_size: usize,
    stats: CacheStats,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache {
    /// Cache with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ImageCacheConfig::default())
    }

    /// Cache with custom limits.
    #[must_use]
    pub fn with_config(config: ImageCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            current_size: 0,
            stats: CacheStats::default(),
        }
    }

    /// Look up an image, refreshing its access time.
    pub fn get(&mut self, name: &str) -> Option<Arc<DecodedImage>> {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.last_accessed = Instant::now();
            self.stats.hits += 1;
            Some(Arc::clone(&entry.image))
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Insert an image, evicting older entries if limits are exceeded.
    pub fn insert(&mut self, name: impl Into<String>, image: Arc<DecodedImage>) {
        let name = name.into();
        let size_bytes = image.size_bytes();
        if let Some(old) = self.entries.remove(&name) {
            self.current_size -= old.size_bytes;
        }
        self.evict_if_needed(size_bytes);
        self.current_size += size_bytes;
        self.stats.bytes_loaded += size_bytes as u64;
        self.entries.insert(
            name,
            CacheEntry {
                image,
                last_accessed: Instant::now(),
                size_bytes,
            },
        );
    }

    /// Split `names` into cached images and the names still to be fetched.
    pub fn lookup_many<'a, I>(&mut self, names: I) -> (DecodedImages, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found = DecodedImages::new();
        let mut missing = Vec::new();
        for name in names {
            if found.contains(name) || missing.iter().any(|m| m == name) {
                continue;
            }
            match self.get(name) {
                Some(image) => found.insert(name, image),
                None => missing.push(name.to_string()),
            }
        }
        (found, missing)
    }

    /// Store every image of a freshly decoded set.
    pub fn insert_all(&mut self, images: &DecodedImages, names: &[String]) {
        for name in names {
            if let Some(image) = images.get(name) {
                self.insert(name.clone(), Arc::clone(image));
            }
        }
    }

    /// Drop an image, e.g. after it was deleted from the library.
    pub fn remove(&mut self, name: &str) -> Option<Arc<DecodedImage>> {
        let entry = self.entries.remove(name)?;
        self.current_size -= entry.size_bytes;
        Some(entry.image)
    }

    /// True when `name` is cached.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_size = 0;
    }

    /// Number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current total pixel bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.current_size
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop entries idle longer than the configured age.
    pub fn maintenance(&mut self) {
        self.evict_expired();
    }

    fn evict_if_needed(&mut self, needed_bytes: usize) {
        while self.current_size + needed_bytes > self.config.max_size_bytes
            && !self.entries.is_empty()
        {
            self.evict_lru();
        }
        while self.entries.len() >= self.config.max_entries && !self.entries.is_empty() {
            self.evict_lru();
        }
        self.evict_expired();
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            if let Some(entry) = self.entries.remove(&key) {
                self.current_size -= entry.size_bytes;
                self.stats.evictions += 1;
                debug!(image = %key, "Evicted decoded image");
            }
        }
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        let max_age = self.config.max_age;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_accessed) > max_age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                self.current_size -= entry.size_bytes;
                self.stats.evictions += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ImageFormat;

    fn image(side: u32) -> Arc<DecodedImage> {
        Arc::new(DecodedImage {
            pixmap: tiny_skia::Pixmap::new(side, side).expect("pixmap"),
            format: ImageFormat::Png,
        })
    }

    #[test]
    fn test_hit_and_miss_counted() {
        let mut cache = ImageCache::new();
        cache.insert("a.png", image(2));
        assert!(cache.get("a.png").is_some());
        assert!(cache.get("b.png").is_none());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.size_bytes(), 16);
    }

    #[test]
    fn test_size_limit_evicts_lru() {
        let mut cache = ImageCache::with_config(ImageCacheConfig {
            max_size_bytes: 100,
            ..ImageCacheConfig::default()
        });
        cache.insert("a.png", image(4));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b.png", image(4));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b.png"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_entry_limit() {
        let mut cache = ImageCache::with_config(ImageCacheConfig {
            max_entries: 2,
            ..ImageCacheConfig::default()
        });
        for name in ["a", "b", "c"] {
            cache.insert(name, image(1));
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_maintenance_drops_idle_entries() {
        let mut cache = ImageCache::with_config(ImageCacheConfig {
            max_age: Duration::from_millis(1),
            ..ImageCacheConfig::default()
        });
        cache.insert("a.png", image(2));
        cache.maintenance();
        std::thread::sleep(Duration::from_millis(5));
        cache.maintenance();
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lookup_many_splits() {
        let mut cache = ImageCache::new();
        cache.insert("a.png", image(1));
        let (found, missing) = cache.lookup_many(["a.png", "b.png", "b.png"]);
        assert!(found.contains("a.png"));
        assert_eq!(missing, vec!["b.png".to_string()]);
    }

    #[test]
    fn test_remove_updates_size() {
        let mut cache = ImageCache::new();
        cache.insert("a.png", image(2));
        assert!(cache.remove("a.png").is_some());
        assert_eq!(cache.size_bytes(), 0);
        assert!(cache.is_empty());
    }
}
