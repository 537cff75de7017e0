//! A bounded directory of blobs guarded by one lock.

use crate::error::{CacheError, Result};
use crate::index::{CacheEntry, CacheStats, DiskLruIndex, METADATA_FILE};
use bridge_traits::storage::FileSystemAccess;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Hits recorded in memory before the metadata is rewritten for them alone.
const TOUCH_FLUSH_INTERVAL: u32 = 32;

/// Disk tier shared by the asset and image caches.
///
/// Blobs are stored as `<root>/<key>`. The lock covers index mutation and the
/// rename or delete that makes a change visible, never a download.
///
/// Inserts, evictions and removals persist the metadata immediately. Hits only
/// update recency in memory and are flushed every [`TOUCH_FLUSH_INTERVAL`]
/// hits or with the next mutation.
pub(crate) struct DiskStore {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
    index: Mutex<DiskLruIndex>,
    // only changed while `index` is locked
    unsaved_touches: AtomicU32,
}

impl DiskStore {
    pub(crate) async fn open(
        fs: Arc<dyn FileSystemAccess>,
        root: PathBuf,
        capacity_bytes: u64,
    ) -> Result<Self> {
        let index = DiskLruIndex::rebuild(fs.as_ref(), &root, capacity_bytes).await?;
        Ok(Self {
            fs,
            root,
            index: Mutex::new(index),
            unsaved_touches: AtomicU32::new(0),
        })
    }

    pub(crate) fn fs(&self) -> &dyn FileSystemAccess {
        self.fs.as_ref()
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub(crate) async fn contains(&self, key: &str) -> bool {
        self.index.lock().await.contains(key)
    }

    /// Look `key` up, verifying its blob, and mark it used.
    ///
    /// A registered entry whose blob is gone, empty or resized is dropped
    /// and reported as a miss.
    pub(crate) async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut index = self.index.lock().await;
        let Some(expected) = index.get(key).map(|e| e.size_bytes) else {
            return Ok(None);
        };

        let path = self.blob_path(key);
        let valid = match self.fs.metadata(&path).await {
            Ok(meta) => meta.size > 0 && meta.size == expected,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(CacheError::storage("Failed to stat cached blob", e)),
        };

        if !valid {
            warn!(key, "Cached blob missing or resized, dropping entry");
            index.remove(key);
            let _ = self.fs.remove_if_exists(&path).await;
            self.persist(&index).await;
            return Ok(None);
        }

        index.touch(key, Utc::now());
        let entry = index.get(key).cloned();
        if self.unsaved_touches.fetch_add(1, Ordering::Relaxed) + 1 >= TOUCH_FLUSH_INTERVAL {
            self.persist(&index).await;
        }
        Ok(entry)
    }

    /// Move a fully written `staged` file into place as `key` and register it,
    /// deleting whatever the insert evicts.
    ///
    /// Fails with `CacheError::Storage` if the blob alone exceeds capacity;
    /// the staged file is deleted and the index is left untouched.
    pub(crate) async fn commit(&self, key: &str, staged: &Path, size_bytes: u64) -> Result<CacheEntry> {
        let path = self.blob_path(key);
        let mut index = self.index.lock().await;

        if size_bytes > index.capacity_bytes() {
            if let Err(e) = self.fs.remove_if_exists(staged).await {
                warn!(key, error = %e, "Failed to delete oversized staged blob");
            }
            warn!(key, size = size_bytes, capacity = index.capacity_bytes(), "Blob exceeds cache capacity");
            return Err(CacheError::Storage(format!(
                "blob of {} bytes exceeds cache capacity of {} bytes",
                size_bytes,
                index.capacity_bytes()
            )));
        }

        if let Err(e) = self.fs.rename(staged, &path).await {
            let _ = self.fs.remove_if_exists(staged).await;
            error!(key, error = %e, "Failed to move blob into place");
            return Err(CacheError::storage("Failed to move blob into place", e));
        }

        let evicted = index.insert(CacheEntry::new(key, size_bytes, Utc::now()));
        for entry in &evicted {
            if let Err(e) = self.fs.remove_if_exists(&self.blob_path(&entry.key)).await {
                warn!(key = %entry.key, error = %e, "Failed to delete evicted blob");
            } else {
                debug!(key = %entry.key, size = entry.size_bytes, "Evicted blob");
            }
        }
        self.persist(&index).await;

        index
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::Storage("blob vanished after commit".to_string()))
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<bool> {
        let mut index = self.index.lock().await;
        let removed = index.remove(key).is_some();
        self.fs
            .remove_if_exists(&self.blob_path(key))
            .await
            .map_err(|e| CacheError::storage("Failed to delete cached blob", e))?;
        if removed {
            self.persist(&index).await;
        }
        Ok(removed)
    }

    /// Delete every file under the root and start over empty.
    pub(crate) async fn clear(&self) -> Result<usize> {
        let mut index = self.index.lock().await;
        let listing = self
            .fs
            .list_directory(&self.root)
            .await
            .map_err(|e| CacheError::storage("Failed to list cache directory", e))?;

        let mut deleted = 0usize;
        for path in listing {
            let is_metadata = path
                .file_name()
                .map(|n| n == METADATA_FILE)
                .unwrap_or(false);
            let result = match self.fs.metadata(&path).await {
                Ok(meta) if meta.is_directory => self.fs.delete_dir_all(&path).await,
                _ => self.fs.remove_if_exists(&path).await,
            };
            match result {
                Ok(()) if !is_metadata => deleted += 1,
                Ok(()) => {}
                Err(e) => warn!(file = ?path.file_name(), error = %e, "Failed to delete cache file"),
            }
        }

        index.clear();
        index
            .save(self.fs.as_ref(), &self.root)
            .await?;
        self.unsaved_touches.store(0, Ordering::Relaxed);
        Ok(deleted)
    }

    pub(crate) async fn stats(&self) -> CacheStats {
        self.index.lock().await.stats()
    }

    pub(crate) async fn total_bytes(&self) -> u64 {
        self.index.lock().await.total_bytes()
    }

    /// Metadata is rebuilt from the directory on open, so a failed save is
    /// logged rather than failing the operation that triggered it.
    async fn persist(&self, index: &DiskLruIndex) {
        match index.save(self.fs.as_ref(), &self.root).await {
            Ok(()) => self.unsaved_touches.store(0, Ordering::Relaxed),
            Err(e) => error!(error = %e, "Failed to persist cache metadata"),
        }
    }
}
