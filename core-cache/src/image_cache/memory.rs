//! Memory tier bounded by decoded footprint.

use super::CachedImage;
use lru::LruCache;
use tracing::debug;

pub(super) struct MemoryTier {
    cache: LruCache<String, CachedImage>,
    capacity_bytes: u64,
    used_bytes: u64,
}

impl MemoryTier {
    pub(super) fn new(capacity_bytes: u64) -> Self {
        Self {
            cache: LruCache::unbounded(),
            capacity_bytes,
            used_bytes: 0,
        }
    }

    pub(super) fn get(&mut self, key: &str) -> Option<CachedImage> {
        self.cache.get(key).cloned()
    }

    /// Returns `false` when the image is larger than the whole tier.
    pub(super) fn insert(&mut self, key: String, image: CachedImage) -> bool {
        let size = image.byte_size();
        if size > self.capacity_bytes {
            debug!(key = %key, size, "Image larger than memory tier, not cached");
            return false;
        }

        if let Some(previous) = self.cache.pop(&key) {
            self.used_bytes -= previous.byte_size();
        }

        while self.used_bytes + size > self.capacity_bytes {
            match self.cache.pop_lru() {
                Some((evicted_key, evicted)) => {
                    self.used_bytes -= evicted.byte_size();
                    debug!(key = %evicted_key, size = evicted.byte_size(), "Evicted image from memory");
                }
                None => break,
            }
        }

        self.cache.put(key, image);
        self.used_bytes += size;
        true
    }

    /// Remove every variant whose key starts with `prefix`.
    pub(super) fn remove_prefixed(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(removed) = self.cache.pop(key) {
                self.used_bytes -= removed.byte_size();
            }
        }
        keys.len()
    }

    pub(super) fn clear(&mut self) {
        self.cache.clear();
        self.used_bytes = 0;
    }

    pub(super) fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub(super) fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub(super) fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};
    use std::sync::Arc;

    fn image(key: &str, w: u32, h: u32) -> CachedImage {
        CachedImage {
            key: key.to_string(),
            image: Arc::new(DynamicImage::ImageRgba8(RgbaImage::new(w, h))),
        }
    }

    #[test]
    fn test_memory_tier_bounded_by_footprint() {
        // 10x10 = 400 bytes each
        let mut tier = MemoryTier::new(1000);
        assert!(tier.insert("a".into(), image("a", 10, 10)));
        assert!(tier.insert("b".into(), image("b", 10, 10)));
        assert_eq!(tier.used_bytes(), 800);

        tier.get("a");
        assert!(tier.insert("c".into(), image("c", 10, 10)));
        assert_eq!(tier.len(), 2);
        assert!(tier.get("b").is_none());
        assert!(tier.get("a").is_some());
        assert!(tier.used_bytes() <= tier.capacity_bytes());
    }

    #[test]
    fn test_memory_tier_rejects_oversized() {
        let mut tier = MemoryTier::new(100);
        assert!(!tier.insert("big".into(), image("big", 10, 10)));
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_replace_does_not_double_count() {
        let mut tier = MemoryTier::new(1000);
        tier.insert("a".into(), image("a", 10, 10));
        tier.insert("a".into(), image("a", 5, 5));
        assert_eq!(tier.used_bytes(), 100);
    }

    #[test]
    fn test_remove_prefixed() {
        let mut tier = MemoryTier::new(10_000);
        tier.insert("k@800x600".into(), image("k", 10, 10));
        tier.insert("k@100x100".into(), image("k", 5, 5));
        tier.insert("other@800x600".into(), image("other", 5, 5));

        assert_eq!(tier.remove_prefixed("k@"), 2);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.used_bytes(), 100);
    }
}
