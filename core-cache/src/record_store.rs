//! # Durable Record Store
//!
//! One JSON document per record under a root directory, plus `index.json`
//! listing the known ids:
//!
//! ```text
//! <root>/
//!   index.json            {"version":1,"ids":["a","b"]}
//!   a.json
//!   b.json
//! ```
//!
//! Every write goes to `<file>.tmp` first and is renamed into place. The
//! index is a hint, not the source of truth: [`DurableRecordStore::load_all`]
//! unions it with the `*.json` files actually present, sets aside anything
//! that no longer parses as `<id>.corrupt` and rewrites the index to match.

use crate::atomic::{is_temp_file, write_atomic};
use crate::error::{CacheError, Result};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "json";
const QUARANTINE_EXTENSION: &str = "corrupt";

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    #[serde(default)]
    ids: Vec<String>,
}

/// Crash-safe store of serde records keyed by id.
pub struct DurableRecordStore<T> {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
    ids: Mutex<BTreeSet<String>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> DurableRecordStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Open the store at `root`, creating the directory if needed.
    ///
    /// The persisted index is read as-is; call [`load_all`](Self::load_all)
    /// to reconcile it with the directory.
    pub async fn open(fs: Arc<dyn FileSystemAccess>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs.create_dir_all(&root)
            .await
            .map_err(|e| CacheError::storage("Failed to create record directory", e))?;

        let ids = read_index(fs.as_ref(), &root).await;
        debug!(records = ids.len(), "Record store opened");

        Ok(Self {
            fs,
            root,
            ids: Mutex::new(ids),
            _record: PhantomData,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    /// Insert or replace the record stored under `id`.
    pub async fn put(&self, id: &str, record: &T) -> Result<()> {
        validate_id(id)?;
        let json = serde_json::to_vec(record)
            .map_err(|e| CacheError::storage("Failed to serialize record", e))?;

        let mut ids = self.ids.lock().await;
        write_atomic(self.fs.as_ref(), &self.record_path(id), Bytes::from(json))
            .await
            .map_err(|e| CacheError::storage("Failed to write record", e))?;

        if ids.insert(id.to_string()) {
            self.write_index(&ids).await?;
        }
        Ok(())
    }

    /// Fetch the record stored under `id`.
    ///
    /// A missing or unparsable record is `None`; only I/O failures are errors.
    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        validate_id(id)?;
        let bytes = match self.fs.read_file(&self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(CacheError::storage("Failed to read record", e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(id, error = %e, "Ignoring corrupt record");
                Ok(None)
            }
        }
    }

    /// Delete the record stored under `id`. Deleting a missing record is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let mut ids = self.ids.lock().await;
        self.fs
            .remove_if_exists(&self.record_path(id))
            .await
            .map_err(|e| CacheError::storage("Failed to delete record", e))?;

        if ids.remove(id) {
            self.write_index(&ids).await?;
        }
        Ok(())
    }

    /// Load every parsable record, healing the index against the directory.
    ///
    /// Records that no longer parse are renamed to `<id>.corrupt` and left
    /// out of the index; leftover temp files are removed.
    #[instrument(skip(self), fields(root = ?self.root.file_name()))]
    pub async fn load_all(&self) -> Result<Vec<(String, T)>> {
        let mut ids = self.ids.lock().await;

        let listing = self
            .fs
            .list_directory(&self.root)
            .await
            .map_err(|e| CacheError::storage("Failed to list record directory", e))?;

        let mut candidates: BTreeSet<String> = ids.clone();
        for path in listing {
            if is_temp_file(&path) {
                let _ = self.fs.remove_if_exists(&path).await;
                continue;
            }
            if let Some(id) = record_id(&path) {
                candidates.insert(id);
            }
        }

        let mut records = Vec::with_capacity(candidates.len());
        let mut healed = BTreeSet::new();
        let mut dropped = 0usize;

        for id in candidates {
            let path = self.record_path(&id);
            let bytes = match self.fs.read_file(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    dropped += 1;
                    continue;
                }
                Err(e) => return Err(CacheError::storage("Failed to read record", e)),
            };

            match serde_json::from_slice::<T>(&bytes) {
                Ok(record) => {
                    healed.insert(id.clone());
                    records.push((id, record));
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Setting aside unreadable record");
                    let quarantined = self.root.join(format!("{}.{}", id, QUARANTINE_EXTENSION));
                    if let Err(e) = self.fs.rename(&path, &quarantined).await {
                        warn!(id = %id, error = %e, "Failed to set aside unreadable record");
                    }
                    dropped += 1;
                }
            }
        }

        if dropped > 0 || healed != *ids {
            info!(records = healed.len(), dropped, "Record index healed");
        }

        self.write_index(&healed).await?;
        *ids = healed;
        Ok(records)
    }

    /// Ids currently in the index.
    pub async fn ids(&self) -> Vec<String> {
        self.ids.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    /// Delete every record, including set-aside ones, and the index.
    pub async fn clear(&self) -> Result<()> {
        let mut ids = self.ids.lock().await;
        let listing = self
            .fs
            .list_directory(&self.root)
            .await
            .map_err(|e| CacheError::storage("Failed to list record directory", e))?;

        for path in listing {
            let quarantined = path
                .extension()
                .is_some_and(|ext| ext == QUARANTINE_EXTENSION);
            if record_id(&path).is_some() || is_temp_file(&path) || quarantined {
                self.fs
                    .remove_if_exists(&path)
                    .await
                    .map_err(|e| CacheError::storage("Failed to delete record", e))?;
            }
        }

        self.fs
            .remove_if_exists(&self.root.join(INDEX_FILE))
            .await
            .map_err(|e| CacheError::storage("Failed to delete record index", e))?;
        ids.clear();
        Ok(())
    }

    async fn write_index(&self, ids: &BTreeSet<String>) -> Result<()> {
        let document = IndexDocument {
            version: INDEX_VERSION,
            ids: ids.iter().cloned().collect(),
        };
        let json = serde_json::to_vec(&document)
            .map_err(|e| CacheError::storage("Failed to serialize record index", e))?;

        write_atomic(self.fs.as_ref(), &self.root.join(INDEX_FILE), Bytes::from(json))
            .await
            .map_err(|e| CacheError::storage("Failed to write record index", e))
    }
}

async fn read_index(fs: &dyn FileSystemAccess, root: &Path) -> BTreeSet<String> {
    let bytes = match fs.read_file(&root.join(INDEX_FILE)).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return BTreeSet::new(),
        Err(e) => {
            warn!(error = %e, "Failed to read record index");
            return BTreeSet::new();
        }
    };

    match serde_json::from_slice::<IndexDocument>(&bytes) {
        Ok(document) if document.version == INDEX_VERSION => document
            .ids
            .into_iter()
            .filter(|id| validate_id(id).is_ok())
            .collect(),
        Ok(document) => {
            warn!(version = document.version, "Unknown record index version");
            BTreeSet::new()
        }
        Err(e) => {
            warn!(error = %e, "Corrupt record index");
            BTreeSet::new()
        }
    }
}

/// Id of a `<id>.json` record file, skipping the index.
fn record_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name == INDEX_FILE {
        return None;
    }
    let id = name.strip_suffix(".json")?;
    validate_id(id).ok()?;
    Some(id.to_string())
}

/// Ids become file names, so only a conservative alphabet is accepted, and
/// never the name the index itself is stored under.
fn validate_id(id: &str) -> Result<()> {
    let reserved = INDEX_FILE
        .strip_suffix(".json")
        .is_some_and(|stem| stem == id);
    let valid = !reserved
        && !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(CacheError::Configuration(format!("invalid record id: {:?}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
        #[serde(default)]
        pinned: bool,
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
            pinned: false,
        }
    }

    async fn open_store(dir: &tempfile::TempDir) -> DurableRecordStore<Note> {
        let fs = Arc::new(TokioFileSystem::rooted_at(dir.path()));
        DurableRecordStore::open(fs, dir.path().join("notes"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.put("a", &note("first")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(note("first")));
        assert_eq!(store.len().await, 1);

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty().await);

        // deleting again is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_twice_keeps_one_file_with_latest_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.put("a", &note("first")).await.unwrap();
        store.put("a", &note("second")).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(note("second")));
        assert_eq!(store.ids().await, vec!["a".to_string()]);

        let files: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != INDEX_FILE)
            .collect();
        assert_eq!(files, vec!["a.json".to_string()]);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.put("a", &note("first")).await.unwrap();

        std::fs::write(store.root().join("a.json"), b"{\"text\":").unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        for id in ["", "../escape", "a/b", "index.json", "index"] {
            assert!(matches!(
                store.put(id, &note("x")).await,
                Err(CacheError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_load_all_heals_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.put("a", &note("a")).await.unwrap();
        store.put("b", &note("b")).await.unwrap();
        store.put("c", &note("c")).await.unwrap();

        let root = store.root().to_path_buf();
        // b's file vanished, c is corrupt, d was written but never indexed
        std::fs::remove_file(root.join("b.json")).unwrap();
        std::fs::write(root.join("c.json"), b"not json").unwrap();
        std::fs::write(root.join("d.json"), br#"{"text":"d"}"#).unwrap();
        std::fs::write(root.join("e.json.tmp"), b"{").unwrap();

        let records = store.load_all().await.unwrap();
        let ids: Vec<_> = records.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(store.ids().await, vec!["a".to_string(), "d".to_string()]);
        assert!(!root.join("c.json").exists());
        assert_eq!(std::fs::read(root.join("c.corrupt")).unwrap(), b"not json");
        assert!(!root.join("e.json.tmp").exists());

        // a fresh instance reads the healed index
        let reopened = open_store(&dir).await;
        assert_eq!(reopened.ids().await, vec!["a".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn test_index_named_record_cannot_clobber_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.put("a", &note("a")).await.unwrap();

        assert!(store.put("index", &note("lost")).await.is_err());

        let reopened = open_store(&dir).await;
        assert_eq!(reopened.ids().await, vec!["a".to_string()]);
        assert_eq!(reopened.get("a").await.unwrap(), Some(note("a")));
    }

    #[tokio::test]
    async fn test_unreadable_record_is_kept_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.put("a", &note("a")).await.unwrap();
        std::fs::write(store.root().join("a.json"), br#"{"body":"other schema"}"#).unwrap();

        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.is_empty().await);
        assert!(store.root().join("a.corrupt").exists());

        // a later load neither resurrects nor deletes it
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.root().join("a.corrupt").exists());
    }

    #[tokio::test]
    async fn test_load_all_without_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.put("a", &note("a")).await.unwrap();
        std::fs::remove_file(store.root().join(INDEX_FILE)).unwrap();

        let reopened = open_store(&dir).await;
        assert!(reopened.is_empty().await);
        let records = reopened.load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.put("a", &note("a")).await.unwrap();
        store.put("b", &note("b")).await.unwrap();

        store.clear().await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(!store.root().join("a.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_puts_keep_index_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir).await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put(&format!("n{}", i), &note("x")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len().await, 16);
        let reopened = open_store(&dir).await;
        assert_eq!(reopened.load_all().await.unwrap().len(), 16);
    }
}
