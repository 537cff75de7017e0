//! # Disk LRU Index
//!
//! In-memory view of a bounded blob directory: one [`CacheEntry`] per file,
//! the running byte total and an access counter used to order entries that
//! share a timestamp.
//!
//! The index is persisted as `metadata.json` next to the blobs. It is never
//! trusted on its own: [`DiskLruIndex::rebuild`] reconciles it with the
//! directory listing every time a cache is opened.

use crate::atomic::{is_temp_file, write_atomic};
use crate::error::{CacheError, Result};
use crate::key::KeyHasher;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const METADATA_FILE: &str = "metadata.json";
const METADATA_VERSION: u32 = 1;

/// One blob registered in a disk tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
    /// Monotonic access counter, breaks `last_accessed` ties.
    #[serde(default)]
    pub sequence: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, size_bytes: u64, last_accessed: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size_bytes,
            last_accessed,
            sequence: 0,
        }
    }

    fn lru_order(&self, other: &Self) -> Ordering {
        self.last_accessed
            .cmp(&other.last_accessed)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Snapshot of a disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub capacity_bytes: u64,
}

impl CacheStats {
    /// Fraction of capacity in use, 0.0 to 1.0.
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.total_bytes as f64 / self.capacity_bytes as f64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    version: u32,
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

/// Size and recency bookkeeping for a bounded directory of blobs.
#[derive(Debug, Clone)]
pub struct DiskLruIndex {
    entries: HashMap<String, CacheEntry>,
    capacity_bytes: u64,
    total_bytes: u64,
    next_sequence: u64,
}

impl DiskLruIndex {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            capacity_bytes,
            total_bytes: 0,
            next_sequence: 0,
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    fn bump_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Mark `key` as used at `now`. Returns `false` if the key is unknown.
    pub fn touch(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let sequence = self.next_sequence;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = now;
                entry.sequence = sequence;
                self.next_sequence += 1;
                true
            }
            None => false,
        }
    }

    /// Register `entry`, replacing any entry with the same key, then evict
    /// least recently used entries until the total fits the capacity.
    ///
    /// Returns the evicted entries; their files are the caller's to delete.
    /// The new entry is only evicted itself when it alone exceeds capacity.
    pub fn insert(&mut self, mut entry: CacheEntry) -> Vec<CacheEntry> {
        entry.sequence = self.bump_sequence();
        let key = entry.key.clone();

        if let Some(previous) = self.entries.remove(&key) {
            self.total_bytes -= previous.size_bytes;
        }
        self.total_bytes += entry.size_bytes;
        self.entries.insert(key.clone(), entry);

        let mut evicted = Vec::new();
        while self.total_bytes > self.capacity_bytes {
            let victim = self
                .entries
                .values()
                .filter(|e| e.key != key)
                .min_by(|a, b| a.lru_order(b))
                .map(|e| e.key.clone())
                .unwrap_or_else(|| key.clone());

            let is_new_entry = victim == key;
            if let Some(removed) = self.remove(&victim) {
                evicted.push(removed);
            }
            if is_new_entry {
                break;
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.total_bytes -= removed.size_bytes;
        Some(removed)
    }

    /// Least recently used entry.
    pub fn lru_victim(&self) -> Option<&CacheEntry> {
        self.entries.values().min_by(|a, b| a.lru_order(b))
    }

    /// Evict until the total fits the capacity.
    pub fn evict_to_capacity(&mut self) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while self.total_bytes > self.capacity_bytes {
            let Some(key) = self.lru_victim().map(|e| e.key.clone()) else {
                break;
            };
            if let Some(removed) = self.remove(&key) {
                evicted.push(removed);
            }
        }
        evicted
    }

    /// All entries, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.lru_order(b));
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            total_bytes: self.total_bytes,
            capacity_bytes: self.capacity_bytes,
        }
    }

    /// Insert without eviction, keeping the persisted sequence.
    fn restore(&mut self, entry: CacheEntry) {
        self.next_sequence = self.next_sequence.max(entry.sequence + 1);
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Write `metadata.json` into `root`.
    pub async fn save(&self, fs: &dyn FileSystemAccess, root: &Path) -> Result<()> {
        let document = MetadataDocument {
            version: METADATA_VERSION,
            entries: self.entries(),
        };
        let json = serde_json::to_vec(&document)
            .map_err(|e| CacheError::storage("Failed to serialize cache metadata", e))?;

        write_atomic(fs, &root.join(METADATA_FILE), Bytes::from(json))
            .await
            .map_err(|e| CacheError::storage("Failed to write cache metadata", e))
    }

    /// Rebuild the index for `root` from `metadata.json` and the directory
    /// listing.
    ///
    /// - entries whose blob is missing or has a different size are dropped
    /// - blobs without an entry are adopted with their mtime
    /// - temp files from interrupted writes are deleted
    /// - if the result exceeds `capacity_bytes`, LRU blobs are deleted
    ///
    /// The healed index is saved before returning.
    pub async fn rebuild(
        fs: &dyn FileSystemAccess,
        root: &Path,
        capacity_bytes: u64,
    ) -> Result<Self> {
        fs.create_dir_all(root)
            .await
            .map_err(|e| CacheError::storage("Failed to create cache directory", e))?;

        let persisted = Self::read_metadata(fs, root).await;

        let listing = fs
            .list_directory(root)
            .await
            .map_err(|e| CacheError::storage("Failed to list cache directory", e))?;

        let mut on_disk: HashMap<String, (u64, Option<i64>)> = HashMap::new();
        for path in listing {
            if is_temp_file(&path) {
                debug!(file = ?path.file_name(), "Removing leftover temp file");
                if let Err(e) = fs.remove_if_exists(&path).await {
                    warn!(error = %e, "Failed to remove temp file");
                }
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !KeyHasher::is_key(name) {
                continue;
            }

            match fs.metadata(&path).await {
                Ok(meta) if !meta.is_directory => {
                    on_disk.insert(name.to_string(), (meta.size, meta.modified_at));
                }
                Ok(_) => {}
                Err(e) => warn!(key = name, error = %e, "Failed to stat cached blob"),
            }
        }

        let mut index = Self::new(capacity_bytes);
        let mut dropped = 0usize;
        for entry in persisted {
            match on_disk.remove(&entry.key) {
                Some((size, _)) if size == entry.size_bytes && size > 0 => index.restore(entry),
                Some(_) => {
                    dropped += 1;
                    // size mismatch, the blob cannot be trusted
                    let _ = fs.remove_if_exists(&root.join(&entry.key)).await;
                }
                None => dropped += 1,
            }
        }

        let mut orphans: Vec<(String, u64, Option<i64>)> = on_disk
            .into_iter()
            .map(|(key, (size, mtime))| (key, size, mtime))
            .collect();
        orphans.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
        let adopted = orphans.len();

        for (key, size, mtime) in orphans {
            if size == 0 {
                let _ = fs.remove_if_exists(&root.join(&key)).await;
                continue;
            }
            let last_accessed = mtime
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .unwrap_or_else(Utc::now);
            let sequence = index.bump_sequence();
            index.restore(CacheEntry {
                key,
                size_bytes: size,
                last_accessed,
                sequence,
            });
        }

        let evicted = index.evict_to_capacity();
        for entry in &evicted {
            if let Err(e) = fs.remove_if_exists(&root.join(&entry.key)).await {
                warn!(key = %entry.key, error = %e, "Failed to delete evicted blob");
            }
        }

        if dropped > 0 || adopted > 0 || !evicted.is_empty() {
            info!(
                entries = index.len(),
                dropped,
                adopted,
                evicted = evicted.len(),
                "Reconciled cache index with disk"
            );
        }

        index.save(fs, root).await?;
        Ok(index)
    }

    async fn read_metadata(fs: &dyn FileSystemAccess, root: &Path) -> Vec<CacheEntry> {
        let path = root.join(METADATA_FILE);
        let bytes = match fs.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read cache metadata, rebuilding from disk");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<MetadataDocument>(&bytes) {
            Ok(document) if document.version == METADATA_VERSION => document.entries,
            Ok(document) => {
                warn!(version = document.version, "Unknown cache metadata version, rebuilding");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Corrupt cache metadata, rebuilding from disk");
                Vec::new()
            }
        }
    }
}
