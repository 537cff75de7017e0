//! # Tiered Image Cache
//!
//! Memory LRU in front of a disk LRU for downsampled images.
//!
//! ## Lookup order
//!
//! 1. Memory tier, keyed by `<url key>@<W>x<H>` so different requested
//!    bounds never alias. A hit does no I/O.
//! 2. Disk tier, keyed by the URL key alone. It holds one downsampled copy
//!    per URL, produced for the first bounds requested. A blob that no
//!    longer decodes is dropped and treated as a miss.
//! 3. Download with bounded retries, decode under [`image::Limits`],
//!    downsample, store in both tiers.
//!
//! Failures along the way are logged and surface as `None`: a missing
//! image is something the UI renders around, not an error.

mod codec;
mod memory;

pub use codec::{downsample, target_dimensions};

use crate::atomic::temp_path;
use crate::config::ImageCacheConfig;
use crate::disk::DiskStore;
use crate::error::{CacheError, Result};
use crate::index::CacheStats;
use crate::inflight::InFlight;
use crate::key::KeyHasher;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use image::{DynamicImage, Limits};
use memory::MemoryTier;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// A decoded, downsampled image.
#[derive(Debug, Clone)]
pub struct CachedImage {
    /// Key of the source URL
    pub key: String,
    pub image: Arc<DynamicImage>,
}

impl CachedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decoded footprint counted against the memory tier (RGBA).
    pub fn byte_size(&self) -> u64 {
        self.width() as u64 * self.height() as u64 * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageCacheStats {
    pub memory_entries: usize,
    pub memory_bytes: u64,
    pub memory_capacity_bytes: u64,
    pub disk: CacheStats,
}

/// Two-tier cache of downsampled images.
pub struct TieredImageCache {
    config: ImageCacheConfig,
    http: Arc<dyn HttpClient>,
    memory: Mutex<MemoryTier>,
    disk: DiskStore,
    inflight: InFlight,
    limits: Limits,
}

impl TieredImageCache {
    /// Open the cache, reconciling the disk tier with what is on disk.
    #[instrument(skip(fs, http, config), fields(disk_capacity = config.disk_capacity_bytes))]
    pub async fn open(
        fs: Arc<dyn FileSystemAccess>,
        http: Arc<dyn HttpClient>,
        config: ImageCacheConfig,
    ) -> Result<Self> {
        config.validate()?;

        let disk = DiskStore::open(fs, config.root.clone(), config.disk_capacity_bytes).await?;
        let limits = codec::decode_limits(&config);
        info!(
            memory_capacity = config.memory_capacity_bytes,
            disk_entries = disk.stats().await.entry_count,
            "Image cache opened"
        );

        Ok(Self {
            memory: Mutex::new(MemoryTier::new(config.memory_capacity_bytes)),
            config,
            http,
            disk,
            inflight: InFlight::new(),
            limits,
        })
    }

    /// Load `url` bounded by the default 800x600.
    pub async fn load_image(&self, url: &str) -> Option<CachedImage> {
        self.load_image_with_bounds(url, self.config.default_max_width, self.config.default_max_height)
            .await
    }

    /// Load `url` downsampled to fit `max_width`x`max_height`.
    ///
    /// Returns `None` when every download attempt fails or the bytes do not
    /// decode. Bounds below one pixel are treated as one.
    #[instrument(skip(self, url))]
    pub async fn load_image_with_bounds(
        &self,
        url: &str,
        max_width: u32,
        max_height: u32,
    ) -> Option<CachedImage> {
        let (max_width, max_height) = (max_width.max(1), max_height.max(1));
        let key = KeyHasher::hash(url);
        let memory_key = format!("{}@{}x{}", key, max_width, max_height);

        if let Some(hit) = self.memory.lock().await.get(&memory_key) {
            debug!(key = %key, "Image memory hit");
            return Some(hit);
        }

        let lock = self.inflight.acquire(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.load_locked(&key, memory_key, url, max_width, max_height)
                .await
        };
        self.inflight.release(&key, lock).await;

        result
    }

    /// Drop every cached variant of `url` from both tiers.
    ///
    /// Waits for an in-progress load of the same URL, so that load cannot
    /// put the stale image back afterwards.
    #[instrument(skip(self, url))]
    pub async fn invalidate_image(&self, url: &str) -> Result<()> {
        let key = KeyHasher::hash(url);

        let lock = self.inflight.acquire(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.invalidate_locked(&key).await
        };
        self.inflight.release(&key, lock).await;

        result
    }

    async fn invalidate_locked(&self, key: &str) -> Result<()> {
        let variants = self
            .memory
            .lock()
            .await
            .remove_prefixed(&format!("{}@", key));
        let on_disk = self.disk.remove(key).await?;
        debug!(key, variants, on_disk, "Invalidated image");
        Ok(())
    }

    /// Empty both tiers.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<()> {
        self.memory.lock().await.clear();
        let deleted = self.disk.clear().await?;
        info!(deleted, "Cleared image cache");
        Ok(())
    }

    /// Empty the memory tier only, e.g. on a memory pressure warning.
    pub async fn clear_memory_cache(&self) {
        self.memory.lock().await.clear();
        debug!("Cleared image memory tier");
    }

    /// Decoded bytes held by the memory tier.
    pub async fn memory_usage(&self) -> u64 {
        self.memory.lock().await.used_bytes()
    }

    /// Encoded bytes held by the disk tier.
    pub async fn disk_usage(&self) -> u64 {
        self.disk.total_bytes().await
    }

    pub async fn stats(&self) -> ImageCacheStats {
        let (memory_entries, memory_bytes, memory_capacity_bytes) = {
            let memory = self.memory.lock().await;
            (memory.len(), memory.used_bytes(), memory.capacity_bytes())
        };
        ImageCacheStats {
            memory_entries,
            memory_bytes,
            memory_capacity_bytes,
            disk: self.disk.stats().await,
        }
    }

    async fn load_locked(
        &self,
        key: &str,
        memory_key: String,
        url: &str,
        max_width: u32,
        max_height: u32,
    ) -> Option<CachedImage> {
        // another caller may have filled it while we waited
        if let Some(hit) = self.memory.lock().await.get(&memory_key) {
            return Some(hit);
        }

        if let Some(stored) = self.read_disk(key).await {
            let image = downsample(stored, max_width, max_height);
            return Some(self.remember(key, memory_key, image).await);
        }

        let bytes = self.download_with_retry(key, url).await?;
        let decoded = match codec::decode(&bytes, &self.limits) {
            Ok(image) => image,
            Err(e) => {
                warn!(key, error = %e, "Downloaded image did not decode");
                return None;
            }
        };

        let image = downsample(decoded, max_width, max_height);
        if let Err(e) = self.write_disk(key, &image).await {
            warn!(key, error = %e, "Failed to store image on disk");
        }

        Some(self.remember(key, memory_key, image).await)
    }

    async fn remember(&self, key: &str, memory_key: String, image: DynamicImage) -> CachedImage {
        let cached = CachedImage {
            key: key.to_string(),
            image: Arc::new(image),
        };
        self.memory.lock().await.insert(memory_key, cached.clone());
        cached
    }

    async fn read_disk(&self, key: &str) -> Option<DynamicImage> {
        match self.disk.lookup(key).await {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Image disk lookup failed");
                return None;
            }
        }

        let bytes = match self.disk.fs().read_file(&self.disk.blob_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to read cached image");
                self.discard(key).await;
                return None;
            }
        };

        match codec::decode(&bytes, &self.limits) {
            Ok(image) => {
                debug!(key, "Image disk hit");
                Some(image)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached image is corrupt, discarding");
                self.discard(key).await;
                None
            }
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.disk.remove(key).await {
            warn!(key, error = %e, "Failed to discard cached image");
        }
    }

    async fn write_disk(&self, key: &str, image: &DynamicImage) -> Result<()> {
        let encoded = codec::encode(image, self.config.disk_format)?;
        let size = encoded.len() as u64;
        let staged = temp_path(&self.disk.blob_path(key));

        if let Err(e) = self.disk.fs().write_file(&staged, Bytes::from(encoded)).await {
            let _ = self.disk.fs().remove_if_exists(&staged).await;
            return Err(CacheError::storage("Failed to write image", e));
        }

        self.disk.commit(key, &staged, size).await?;
        debug!(key, size, "Image stored on disk");
        Ok(())
    }

    async fn download_with_retry(&self, key: &str, url: &str) -> Option<Bytes> {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            match self.download(url).await {
                Ok(bytes) => return Some(bytes),
                Err(e) => {
                    warn!(key, attempt, max_attempts, error = %e, "Image download attempt failed");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_base_delay * attempt).await;
            }
        }

        warn!(key, "Image download failed after all attempts");
        None
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .http
            .execute(HttpRequest::new(HttpMethod::Get, url))
            .await
            .and_then(|response| response.error_for_status())
            .map_err(CacheError::network)?;

        if response.body.is_empty() {
            return Err(CacheError::Network("empty response".to_string()));
        }
        Ok(response.body)
    }
}
