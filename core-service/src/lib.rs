//! Core service façade and bootstrap.
//!
//! This crate is the composition root: it takes a validated
//! [`CoreConfig`] and opens one handle per manager over the host bridges.
//! Desktop apps typically enable the `desktop-shims` feature so that
//! `CoreConfig::builder()` fills in the tokio file system and reqwest client.
//!
//! ```ignore
//! use core_service::{CoreConfig, SafetyCore};
//!
//! let config = CoreConfig::builder()
//!     .cache_dir(cache_dir)
//!     .data_dir(data_dir)
//!     .remote_base_url("https://api.example.com/v1")
//!     .build()?;
//!
//! let core = SafetyCore::bootstrap(config).await?;
//! core.emergencies().report(EmergencyRecord::new("fall")).await?;
//!
//! // host detected that the network is back
//! let result = core.on_connectivity_restored().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_cache::{AssetHandle, BinaryAssetCache, CachedImage, TieredImageCache};
pub use core_runtime::config::CoreConfig;
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_sync::{EmergencyQueue, EmergencyRecord, QueuedWrite, SyncResult, WriteStatus};

use bridge_traits::remote::RemoteRecord;
use core_cache::{AssetCacheConfig, ImageCacheConfig};
use core_sync::WriteQueueConfig;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
///
/// Cheap to clone; every clone shares the same managers. Build exactly one
/// per cache root.
#[derive(Clone)]
pub struct SafetyCore {
    config: Arc<CoreConfig>,
    videos: Arc<BinaryAssetCache>,
    images: Arc<TieredImageCache>,
    emergencies: Arc<EmergencyQueue>,
}

impl SafetyCore {
    /// Open every manager under the configured roots.
    ///
    /// - videos: `<cache_dir>/video_cache`
    /// - images: `<cache_dir>/image_cache`
    /// - emergency queue: `<data_dir>/emergency_queue`
    #[instrument(skip_all, fields(cache_dir = ?config.cache_dir, data_dir = ?config.data_dir))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let fs = Arc::clone(&config.file_system);
        let http = Arc::clone(&config.http_client);

        let videos = BinaryAssetCache::open(
            Arc::clone(&fs),
            Arc::clone(&http),
            AssetCacheConfig::new(config.video_cache_dir()).with_capacity(config.video_cache_bytes),
        )
        .await?;

        let images = TieredImageCache::open(
            Arc::clone(&fs),
            http,
            ImageCacheConfig::new(config.image_cache_dir())
                .with_disk_capacity(config.image_disk_bytes)
                .with_memory_budget(config.memory_budget_bytes)
                .with_retry_base_delay(config.image_retry_base_delay),
        )
        .await?;

        let emergencies = EmergencyQueue::open(
            fs,
            Arc::clone(&config.remote_store),
            WriteQueueConfig::new(
                config.emergency_queue_dir(),
                config.emergency_collection.clone(),
            ),
        )
        .await?;

        let pending_emergencies = emergencies.pending_count().await;
        info!(pending_emergencies, "Safety core ready");

        Ok(Self {
            config: Arc::new(config),
            videos: Arc::new(videos),
            images: Arc::new(images),
            emergencies: Arc::new(emergencies),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Disk cache for videos and other large assets.
    pub fn videos(&self) -> Arc<BinaryAssetCache> {
        Arc::clone(&self.videos)
    }

    /// Memory and disk cache for downsampled images.
    pub fn images(&self) -> Arc<TieredImageCache> {
        Arc::clone(&self.images)
    }

    /// Offline queue of emergency reports.
    pub fn emergencies(&self) -> Arc<EmergencyQueue> {
        Arc::clone(&self.emergencies)
    }

    /// Deliver queued emergency reports. Call when the host regains connectivity.
    #[instrument(skip(self))]
    pub async fn on_connectivity_restored(&self) -> Result<SyncResult> {
        Ok(self.emergencies.drain().await?)
    }

    /// Release decoded images held in memory.
    pub async fn on_memory_warning(&self) {
        self.images.clear_memory_cache().await;
    }

    /// Live snapshots of the remote records under `path`.
    pub async fn subscribe(
        &self,
        path: &str,
    ) -> Result<BoxStream<'static, bridge_traits::error::Result<Vec<RemoteRecord>>>> {
        Ok(self.config.remote_store.subscribe(path).await?)
    }
}

impl std::fmt::Debug for SafetyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyCore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use bridge_traits::remote::{CreateRecord, RecordId, RemoteStore};
    use futures::stream::{self, StreamExt};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves a fixed video body; image requests 404.
    struct VideoHttp;

    #[async_trait]
    impl HttpClient for VideoHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse {
                status: 404,
                headers: HashMap::new(),
                body: bytes::Bytes::new(),
            })
        }

        async fn download_stream(
            &self,
            _url: String,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Ok(Box::new(std::io::Cursor::new(vec![5u8; 256])))
        }
    }

    #[derive(Default)]
    struct FlakyRemote {
        online: AtomicBool,
        created: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn create_record(&self, request: CreateRecord) -> BridgeResult<RecordId> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(BridgeError::OperationFailed("offline".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(RecordId::new(request.idempotency_key.unwrap_or_default()))
        }

        async fn subscribe(
            &self,
            path: &str,
        ) -> BridgeResult<BoxStream<'static, BridgeResult<Vec<RemoteRecord>>>> {
            let record = RemoteRecord {
                id: RecordId::new(format!("{}-1", path)),
                data: serde_json::json!({"kind": "fire"}),
            };
            Ok(stream::iter(vec![Ok(vec![record])]).boxed())
        }
    }

    fn config(dir: &tempfile::TempDir, remote: Arc<FlakyRemote>) -> CoreConfig {
        CoreConfig::builder()
            .cache_dir(dir.path().join("cache"))
            .data_dir(dir.path().join("data"))
            .file_system(Arc::new(TokioFileSystem::rooted_at(dir.path())))
            .http_client(Arc::new(VideoHttp))
            .remote_store(remote)
            .image_retry_base_delay(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_lays_out_directories() {
        let dir = tempfile::tempdir().unwrap();
        let core = SafetyCore::bootstrap(config(&dir, Arc::new(FlakyRemote::default())))
            .await
            .unwrap();

        assert!(dir.path().join("cache").join("video_cache").is_dir());
        assert!(dir.path().join("cache").join("image_cache").is_dir());
        assert!(dir.path().join("data").join("emergency_queue").is_dir());
        assert_eq!(core.videos().stats().await.capacity_bytes, 70 * 1024 * 1024);
        assert_eq!(
            core.images().stats().await.memory_capacity_bytes,
            64 * 1024 * 1024
        );
    }

    #[tokio::test]
    async fn test_connectivity_restored_drains_emergencies() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FlakyRemote::default());
        let core = SafetyCore::bootstrap(config(&dir, remote.clone()))
            .await
            .unwrap();

        core.emergencies()
            .report(EmergencyRecord::new("fall"))
            .await
            .unwrap();
        let offline = core.on_connectivity_restored().await.unwrap();
        assert_eq!(offline.failure_count, 1);
        assert!(core.emergencies().has_pending_emergencies().await);

        remote.online.store(true, Ordering::SeqCst);
        let online = core.on_connectivity_restored().await.unwrap();
        assert_eq!(online.success_count, 1);
        assert_eq!(remote.created.load(Ordering::SeqCst), 1);
        assert!(!core.emergencies().has_pending_emergencies().await);
    }

    #[tokio::test]
    async fn test_pending_reports_survive_rebootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FlakyRemote::default());

        {
            let core = SafetyCore::bootstrap(config(&dir, remote.clone()))
                .await
                .unwrap();
            core.emergencies()
                .report(EmergencyRecord::new("medical"))
                .await
                .unwrap();
        }

        let core = SafetyCore::bootstrap(config(&dir, remote)).await.unwrap();
        assert_eq!(core.emergencies().pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_managers_are_shared_between_clones() {
        let dir = tempfile::tempdir().unwrap();
        let core = SafetyCore::bootstrap(config(&dir, Arc::new(FlakyRemote::default())))
            .await
            .unwrap();
        let clone = core.clone();

        core.videos().fetch("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(clone.videos().contains("https://cdn.example.com/a.mp4").await);
        assert!(clone.images().load_image("https://cdn.example.com/a.png").await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let core = SafetyCore::bootstrap(config(&dir, Arc::new(FlakyRemote::default())))
            .await
            .unwrap();

        let mut snapshots = core.subscribe("emergencies").await.unwrap();
        let first = snapshots.next().await.unwrap().unwrap();
        assert_eq!(first[0].id.as_str(), "emergencies-1");
    }

    #[test]
    fn test_runtime_errors_keep_missing_capability() {
        let err = CoreError::from(core_runtime::Error::CapabilityMissing {
            capability: "RemoteStore".to_string(),
            message: "inject one".to_string(),
        });
        assert!(matches!(err, CoreError::CapabilityMissing { ref capability, .. } if capability == "RemoteStore"));
    }
}
