//! # Durable Write Queue
//!
//! Offline-first delivery of records to a [`RemoteStore`].
//!
//! ## Overview
//!
//! Each queued write is one JSON file in a [`DurableRecordStore`], so the
//! queue survives process restarts. A write moves through
//!
//! ```text
//! Pending ──drain──▶ Syncing ──ok──▶ (deleted)
//!    ▲                  │
//!    └──── Failed ◀─────┘ err, retry_count += 1
//! ```
//!
//! A delivered write is deleted rather than kept as `Synced`: absence is the
//! success marker. A `Failed` write is picked up by the next drain until it
//! has failed `max_retry` times; after that it stays on disk, visible through
//! [`DurableWriteQueue::pending`] and [`DurableWriteQueue::permanently_failed`],
//! until the caller deletes it.
//!
//! ## Delivery guarantees
//!
//! - At least once: a write is only deleted after the remote store
//!   acknowledged it. A crash after the acknowledgement but before the
//!   delete re-sends it on the next drain.
//! - Every create carries the queue id as its idempotency key, so stores
//!   that honor client ids turn that re-send into a no-op. Stores that
//!   assign ids server-side can still see a duplicate in that window.
//! - The `Pending/Failed → Syncing` transition happens under the queue
//!   lock, so overlapping drains never send the same write twice.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{DurableWriteQueue, WriteQueueConfig};
//!
//! let queue = DurableWriteQueue::open(
//!     fs.clone(),
//!     remote.clone(),
//!     WriteQueueConfig::new(data_dir.join("emergency_queue"), "emergencies"),
//! )
//! .await?;
//!
//! queue.enqueue(report).await?;
//!
//! // later, when connectivity returns
//! let result = queue.drain().await?;
//! ```

use bridge_traits::remote::{CreateRecord, RemoteStore};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_cache::DurableRecordStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Maximum number of delivery attempts per queued write
pub const MAX_RETRY: u32 = 3;

/// Delivery status of a queued write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStatus {
    /// Waiting for its first attempt
    Pending,
    /// An attempt is in flight
    Syncing,
    /// Acknowledged by the remote store. Never persisted; delivered writes are deleted.
    Synced,
    /// The last attempt failed
    Failed,
}

impl WriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Still awaiting delivery (pending or failed)
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl std::fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write waiting to be delivered to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWrite<T> {
    /// Unique identifier, also sent as the idempotency key
    pub id: Uuid,
    /// Remote collection the record is created in
    pub collection: String,
    pub payload: T,
    pub status: WriteStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Number of failed attempts
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Enqueue order, breaks `created_at` ties
    #[serde(default)]
    pub sequence: u64,
}

impl<T> QueuedWrite<T> {
    fn new(collection: String, payload: T, now: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            payload,
            status: WriteStatus::Pending,
            created_at: now,
            last_attempt_at: None,
            retry_count: 0,
            last_error: None,
            sequence,
        }
    }

    /// Whether a drain may attempt this write again
    pub fn can_retry(&self, max_retry: u32) -> bool {
        self.status.is_pending() && self.retry_count < max_retry
    }

    /// Failed `max_retry` times; only an explicit delete removes it
    pub fn is_permanently_failed(&self, max_retry: u32) -> bool {
        self.status == WriteStatus::Failed && self.retry_count >= max_retry
    }

    fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.status = WriteStatus::Syncing;
        self.last_attempt_at = Some(now);
    }

    fn fail(&mut self, error: String) {
        self.retry_count += 1;
        self.status = WriteStatus::Failed;
        self.last_error = Some(error);
    }

    /// Oldest first
    fn queue_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.sequence.cmp(&other.sequence))
            .then(self.id.cmp(&other.id))
    }
}

/// Outcome counts of one [`DurableWriteQueue::drain`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Size of the snapshot taken when the drain started
    pub total_count: usize,
    /// Writes taken by a concurrent drain or deleted mid-pass
    pub skipped_count: usize,
}

impl SyncResult {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.skipped_count == 0
    }
}

/// Write queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteQueueConfig {
    /// Directory holding one file per queued write
    pub root: PathBuf,
    /// Collection used by [`DurableWriteQueue::enqueue`]
    pub collection: String,
    pub max_retry: u32,
}

impl WriteQueueConfig {
    pub fn new(root: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            collection: collection.into(),
            max_retry: MAX_RETRY,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(SyncError::Configuration(
                "queue root cannot be empty".to_string(),
            ));
        }
        if self.collection.trim().is_empty() {
            return Err(SyncError::Configuration(
                "collection cannot be empty".to_string(),
            ));
        }
        if self.max_retry == 0 {
            return Err(SyncError::Configuration(
                "max_retry must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

struct QueueState<T> {
    entries: HashMap<Uuid, QueuedWrite<T>>,
    next_sequence: u64,
}

enum Attempt {
    Delivered,
    Failed,
    Skipped,
}

/// Persistent queue of writes bound for a [`RemoteStore`]
pub struct DurableWriteQueue<T> {
    config: WriteQueueConfig,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    store: DurableRecordStore<QueuedWrite<T>>,
    state: Mutex<QueueState<T>>,
}

impl<T> DurableWriteQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open the queue, loading every persisted write.
    pub async fn open(
        fs: Arc<dyn FileSystemAccess>,
        remote: Arc<dyn RemoteStore>,
        config: WriteQueueConfig,
    ) -> Result<Self> {
        Self::open_with_clock(fs, remote, config, Arc::new(SystemClock)).await
    }

    /// Open the queue with an explicit time source.
    ///
    /// Writes left in `Syncing` by a previous process are reset to `Pending`
    /// without counting a failure: whether that attempt reached the remote
    /// store is unknown, so it is attempted again.
    #[instrument(skip_all, fields(collection = %config.collection))]
    pub async fn open_with_clock(
        fs: Arc<dyn FileSystemAccess>,
        remote: Arc<dyn RemoteStore>,
        config: WriteQueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store: DurableRecordStore<QueuedWrite<T>> =
            DurableRecordStore::open(fs, config.root.clone()).await?;

        let mut entries = HashMap::new();
        let mut next_sequence = 0;
        let mut interrupted = 0usize;

        for (file_id, mut write) in store.load_all().await? {
            if write.id.to_string() != file_id {
                warn!(file_id = %file_id, id = %write.id, "Queued write id does not match its file, skipping");
                continue;
            }

            match write.status {
                WriteStatus::Syncing => {
                    write.status = WriteStatus::Pending;
                    store.put(&file_id, &write).await?;
                    interrupted += 1;
                }
                WriteStatus::Synced => {
                    store.delete(&file_id).await?;
                    continue;
                }
                WriteStatus::Pending | WriteStatus::Failed => {}
            }

            next_sequence = next_sequence.max(write.sequence + 1);
            entries.insert(write.id, write);
        }

        if interrupted > 0 {
            warn!(interrupted, "Reset writes interrupted mid-sync to pending");
        }
        info!(entries = entries.len(), "Write queue opened");

        Ok(Self {
            config,
            remote,
            clock,
            store,
            state: Mutex::new(QueueState {
                entries,
                next_sequence,
            }),
        })
    }

    pub fn config(&self) -> &WriteQueueConfig {
        &self.config
    }

    /// Persist `payload` as a new pending write to the configured collection.
    ///
    /// Does not attempt delivery.
    pub async fn enqueue(&self, payload: T) -> Result<Uuid> {
        self.enqueue_to(self.config.collection.clone(), payload)
            .await
    }

    /// Persist `payload` as a new pending write to `collection`.
    #[instrument(skip_all)]
    pub async fn enqueue_to(&self, collection: impl Into<String>, payload: T) -> Result<Uuid> {
        let collection = collection.into();
        if collection.trim().is_empty() {
            return Err(SyncError::Configuration(
                "collection cannot be empty".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let write = QueuedWrite::new(collection, payload, self.clock.now(), state.next_sequence);
        let id = write.id;

        self.store.put(&id.to_string(), &write).await?;
        state.next_sequence += 1;
        state.entries.insert(id, write);

        info!(id = %id, pending = state.entries.len(), "Write queued");
        Ok(id)
    }

    /// Writes still awaiting delivery, oldest first.
    ///
    /// Includes writes that exhausted their retries.
    pub async fn pending(&self) -> Vec<QueuedWrite<T>> {
        self.collect(|write| write.status.is_pending()).await
    }

    /// Pending writes the next drain will attempt.
    pub async fn retryable(&self) -> Vec<QueuedWrite<T>> {
        let max_retry = self.config.max_retry;
        self.collect(|write| write.can_retry(max_retry)).await
    }

    /// Writes that failed `max_retry` times and need the caller's attention.
    pub async fn permanently_failed(&self) -> Vec<QueuedWrite<T>> {
        let max_retry = self.config.max_retry;
        self.collect(|write| write.is_permanently_failed(max_retry))
            .await
    }

    pub async fn has_pending(&self) -> bool {
        self.state
            .lock()
            .await
            .entries
            .values()
            .any(|write| write.status.is_pending())
    }

    pub async fn pending_count(&self) -> usize {
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|write| write.status.is_pending())
            .count()
    }

    pub async fn get(&self, id: Uuid) -> Option<QueuedWrite<T>> {
        self.state.lock().await.entries.get(&id).cloned()
    }

    /// Attempt every retryable write once, oldest first.
    ///
    /// Works on a snapshot taken at call time; writes enqueued meanwhile wait
    /// for the next drain. A failure is recorded on its write and never
    /// aborts the pass.
    #[instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn drain(&self) -> Result<SyncResult> {
        let snapshot: Vec<Uuid> = self
            .retryable()
            .await
            .into_iter()
            .map(|write| write.id)
            .collect();

        let mut result = SyncResult {
            total_count: snapshot.len(),
            ..SyncResult::default()
        };
        if snapshot.is_empty() {
            debug!("Nothing to sync");
            return Ok(result);
        }

        info!(total = snapshot.len(), "Draining write queue");
        for id in snapshot {
            match self.attempt(id).await {
                Attempt::Delivered => result.success_count += 1,
                Attempt::Failed => result.failure_count += 1,
                Attempt::Skipped => result.skipped_count += 1,
            }
        }

        info!(
            success = result.success_count,
            failure = result.failure_count,
            skipped = result.skipped_count,
            "Write queue drained"
        );
        Ok(result)
    }

    /// Delete a write regardless of its status. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn delete_entry(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.store.delete(&id.to_string()).await?;
        let removed = state.entries.remove(&id).is_some();
        if removed {
            info!(id = %id, "Queued write deleted");
        }
        Ok(removed)
    }

    /// Delete every queued write.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.store.clear().await?;
        let cleared = state.entries.len();
        state.entries.clear();
        info!(cleared, "Write queue cleared");
        Ok(())
    }

    async fn collect(&self, keep: impl Fn(&QueuedWrite<T>) -> bool) -> Vec<QueuedWrite<T>> {
        let state = self.state.lock().await;
        let mut writes: Vec<_> = state
            .entries
            .values()
            .filter(|write| keep(write))
            .cloned()
            .collect();
        writes.sort_by(|a, b| a.queue_order(b));
        writes
    }

    async fn attempt(&self, id: Uuid) -> Attempt {
        let write = match self.claim(id).await {
            Ok(Some(write)) => write,
            Ok(None) => return Attempt::Skipped,
            Err(e) => {
                error!(id = %id, error = %e, "Failed to persist sync attempt");
                return Attempt::Failed;
            }
        };

        let delivered = match serde_json::to_value(&write.payload) {
            Ok(payload) => self
                .remote
                .create_record(
                    CreateRecord::new(write.collection.clone(), payload)
                        .with_idempotency_key(id.to_string()),
                )
                .await
                .map_err(|e| SyncError::Remote(e.to_string())),
            Err(e) => Err(SyncError::from(e)),
        };

        match delivered {
            Ok(remote_id) => {
                self.complete(id).await;
                debug!(id = %id, remote_id = %remote_id, "Queued write delivered");
                Attempt::Delivered
            }
            Err(e) => {
                self.record_failure(id, e).await;
                Attempt::Failed
            }
        }
    }

    /// Move `id` from `Pending`/`Failed` to `Syncing` under the queue lock.
    ///
    /// `None` when another drain took it, it was deleted, or it is out of retries.
    async fn claim(&self, id: Uuid) -> Result<Option<QueuedWrite<T>>> {
        let mut state = self.state.lock().await;
        let max_retry = self.config.max_retry;
        let Some(write) = state.entries.get_mut(&id) else {
            return Ok(None);
        };
        if !write.can_retry(max_retry) {
            return Ok(None);
        }

        let previous = write.clone();
        write.start_attempt(self.clock.now());
        if let Err(e) = self.store.put(&id.to_string(), write).await {
            *write = previous;
            return Err(e.into());
        }

        Ok(Some(write.clone()))
    }

    async fn complete(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        if let Err(e) = self.store.delete(&id.to_string()).await {
            // left on disk as Syncing, so the next open re-sends it
            error!(id = %id, error = %e, "Failed to delete delivered write");
        }
        state.entries.remove(&id);
    }

    async fn record_failure(&self, id: Uuid, error: SyncError) {
        let mut state = self.state.lock().await;
        let max_retry = self.config.max_retry;
        let Some(write) = state.entries.get_mut(&id) else {
            debug!(id = %id, "Failed write was deleted mid-attempt");
            return;
        };

        write.fail(error.to_string());
        if let Err(e) = self.store.put(&id.to_string(), write).await {
            error!(id = %id, error = %e, "Failed to persist write failure");
        }

        if write.retry_count >= max_retry {
            warn!(id = %id, retry_count = write.retry_count, error = %error, "Queued write exhausted its retries");
        } else {
            warn!(id = %id, retry_count = write.retry_count, error = %error, "Queued write failed");
        }
    }
}

impl<T> std::fmt::Debug for DurableWriteQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableWriteQueue")
            .field("config", &self.config)
            .field("remote", &"<RemoteStore>")
            .finish()
    }
}
