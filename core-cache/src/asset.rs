//! # Binary Asset Cache
//!
//! Disk-only LRU cache for large downloaded assets such as videos.
//!
//! A miss streams the response body into `<key>.part`, renames it to
//! `<key>` and registers it, evicting least recently used assets until the
//! cache fits its capacity again. This cache never retries: a failed fetch
//! is reported to the caller and leaves nothing behind.

use crate::atomic::{with_suffix, PARTIAL_SUFFIX};
use crate::config::AssetCacheConfig;
use crate::disk::DiskStore;
use crate::error::{CacheError, Result};
use crate::index::CacheStats;
use crate::inflight::InFlight;
use crate::key::KeyHasher;
use bridge_traits::{http::HttpClient, storage::FileSystemAccess};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

/// A cached asset on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// `false` when this call downloaded the asset
    pub from_cache: bool,
}

/// Bounded disk cache for large binary downloads.
pub struct BinaryAssetCache {
    config: AssetCacheConfig,
    http: Arc<dyn HttpClient>,
    store: DiskStore,
    inflight: InFlight,
}

impl BinaryAssetCache {
    /// Open the cache, reconciling its index with what is on disk.
    #[instrument(skip(fs, http, config), fields(capacity = config.capacity_bytes))]
    pub async fn open(
        fs: Arc<dyn FileSystemAccess>,
        http: Arc<dyn HttpClient>,
        config: AssetCacheConfig,
    ) -> Result<Self> {
        config.validate()?;

        let store = DiskStore::open(fs, config.root.clone(), config.capacity_bytes).await?;
        let stats = store.stats().await;
        info!(
            entries = stats.entry_count,
            total_bytes = stats.total_bytes,
            "Asset cache opened"
        );

        Ok(Self {
            config,
            http,
            store,
            inflight: InFlight::new(),
        })
    }

    /// Return the cached file for `url`, downloading it on a miss.
    ///
    /// Concurrent fetches of the same URL download once; the later callers
    /// observe the first caller's result as a hit.
    #[instrument(skip(self, url))]
    pub async fn fetch(&self, url: &str) -> Result<AssetHandle> {
        let key = KeyHasher::hash(url);

        if let Some(handle) = self.cached_handle(&key).await? {
            return Ok(handle);
        }

        let lock = self.inflight.acquire(&key).await;
        let result = {
            let _guard = lock.lock().await;
            match self.cached_handle(&key).await {
                Ok(Some(handle)) => Ok(handle),
                Ok(None) => self.download(&key, url).await,
                Err(e) => Err(e),
            }
        };
        self.inflight.release(&key, lock).await;

        result
    }

    /// Whether `url` is cached. Never touches the network.
    pub async fn contains(&self, url: &str) -> bool {
        self.store.contains(&KeyHasher::hash(url)).await
    }

    /// Path of the cached file for `url`, if registered. Never touches the network.
    pub async fn cached_path(&self, url: &str) -> Option<PathBuf> {
        let key = KeyHasher::hash(url);
        if self.store.contains(&key).await {
            Some(self.store.blob_path(&key))
        } else {
            None
        }
    }

    /// Drop `url` from the cache. Returns whether it was cached.
    #[instrument(skip(self, url))]
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let key = KeyHasher::hash(url);
        let removed = self.store.remove(&key).await?;
        if removed {
            debug!(key = %key, "Removed cached asset");
        }
        Ok(removed)
    }

    /// Delete every cached asset.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let deleted = self.store.clear().await?;
        info!(deleted, "Cleared asset cache");
        Ok(())
    }

    /// Total size of cached assets in bytes.
    pub async fn size_bytes(&self) -> u64 {
        self.store.total_bytes().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    async fn cached_handle(&self, key: &str) -> Result<Option<AssetHandle>> {
        let Some(entry) = self.store.lookup(key).await? else {
            return Ok(None);
        };

        debug!(key, size = entry.size_bytes, "Asset cache hit");
        Ok(Some(AssetHandle {
            key: entry.key,
            path: self.store.blob_path(key),
            size_bytes: entry.size_bytes,
            from_cache: true,
        }))
    }

    async fn download(&self, key: &str, url: &str) -> Result<AssetHandle> {
        debug!(key, "Asset cache miss, downloading");
        let partial = with_suffix(&self.store.blob_path(key), PARTIAL_SUFFIX);

        let size_bytes = match self.stream_to(url, &partial).await {
            Ok(0) => Err(CacheError::Network("empty response".to_string())),
            other => other,
        };

        let size_bytes = match size_bytes {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = self.store.fs().remove_if_exists(&partial).await {
                    warn!(key, error = %cleanup, "Failed to delete partial download");
                }
                warn!(key, error = %e, "Asset download failed");
                return Err(e);
            }
        };

        let entry = self.store.commit(key, &partial, size_bytes).await?;
        info!(key, size = size_bytes, "Asset cached");

        Ok(AssetHandle {
            key: entry.key,
            path: self.store.blob_path(key),
            size_bytes,
            from_cache: false,
        })
    }

    /// Stream the body of `url` into `path`, returning the byte count.
    async fn stream_to(&self, url: &str, path: &Path) -> Result<u64> {
        let mut reader = self
            .http
            .download_stream(url.to_string())
            .await
            .map_err(CacheError::network)?;

        let mut writer = self
            .store
            .fs()
            .open_write_stream(path)
            .await
            .map_err(|e| CacheError::storage("Failed to open download file", e))?;

        let mut buffer = vec![0u8; self.config.stream_buffer_bytes];
        let mut written = 0u64;
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(CacheError::network)?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| CacheError::storage("Failed to write download", e))?;
            written += read as u64;
        }

        writer
            .shutdown()
            .await
            .map_err(|e| CacheError::storage("Failed to flush download", e))?;

        Ok(written)
    }
}
