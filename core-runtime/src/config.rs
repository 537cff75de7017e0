//! # Core Configuration Module
//!
//! Provides configuration management for the safety core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding the host bridges and the sizing of each manager. Validation is
//! fail-fast: missing bridges and nonsensical capacities are rejected at
//! `build()` time rather than on first use.
//!
//! ## Required Dependencies
//!
//! - `RemoteStore` - destination for queued emergency records
//! - `FileSystemAccess` - file I/O (desktop default: tokio fs)
//! - `HttpClient` - asset downloads (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled, desktop defaults for
//! `FileSystemAccess` and `HttpClient` are injected if not provided, and a
//! `RemoteStore` can be derived from [`CoreConfigBuilder::remote_base_url`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .data_dir("/path/to/data")
//!     .file_system(Arc::new(MyFileSystem))
//!     .http_client(Arc::new(MyHttpClient))
//!     .remote_store(Arc::new(MyRemoteStore))
//!     .video_cache_bytes(100 * 1024 * 1024)
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, RemoteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Default capacity of the video cache (70 MiB).
pub const DEFAULT_VIDEO_CACHE_BYTES: u64 = 70 * MIB;
/// Default capacity of the image disk tier (50 MiB).
pub const DEFAULT_IMAGE_DISK_BYTES: u64 = 50 * MIB;
/// Default memory budget the image memory tier takes its share from (256 MiB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 256 * MIB;
/// Default remote collection for emergency records.
pub const DEFAULT_EMERGENCY_COLLECTION: &str = "emergencies";
/// Default base delay between image download attempts.
pub const DEFAULT_IMAGE_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single disk tier (100 GB).
const MAX_DISK_BYTES: u64 = 100_000 * MIB;

/// Core configuration for the safety core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root under which the video and image caches live
    pub cache_dir: PathBuf,

    /// Root under which durable data (the emergency queue) lives
    pub data_dir: PathBuf,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// HTTP client used for asset and image downloads
    pub http_client: Arc<dyn HttpClient>,

    /// Remote store receiving queued records
    pub remote_store: Arc<dyn RemoteStore>,

    /// Capacity of the video cache in bytes
    pub video_cache_bytes: u64,

    /// Capacity of the image disk tier in bytes
    pub image_disk_bytes: u64,

    /// Memory budget; the image memory tier uses a quarter of it
    pub memory_budget_bytes: u64,

    /// Remote collection that emergency records are written to
    pub emergency_collection: String,

    /// Base delay between image download attempts
    pub image_retry_base_delay: Duration,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("data_dir", &self.data_dir)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("remote_store", &"RemoteStore { ... }")
            .field("video_cache_bytes", &self.video_cache_bytes)
            .field("image_disk_bytes", &self.image_disk_bytes)
            .field("memory_budget_bytes", &self.memory_budget_bytes)
            .field("emergency_collection", &self.emergency_collection)
            .field("image_retry_base_delay", &self.image_retry_base_delay)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Directory of the video cache.
    pub fn video_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("video_cache")
    }

    /// Directory of the image disk tier.
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("image_cache")
    }

    /// Directory of the emergency queue.
    pub fn emergency_queue_dir(&self) -> PathBuf {
        self.data_dir.join("emergency_queue")
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Directories are not empty
    /// - Capacities are greater than zero and below 100GB
    /// - The emergency collection is not blank
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        for (name, bytes) in [
            ("Video cache", self.video_cache_bytes),
            ("Image disk cache", self.image_disk_bytes),
            ("Memory budget", self.memory_budget_bytes),
        ] {
            if bytes == 0 {
                return Err(Error::Config(format!(
                    "{} size must be greater than 0 bytes",
                    name
                )));
            }
            if bytes > MAX_DISK_BYTES {
                return Err(Error::Config(format!(
                    "{} size exceeds maximum of 100GB",
                    name
                )));
            }
        }

        if self.emergency_collection.trim().is_empty() {
            return Err(Error::Config(
                "Emergency collection cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for cache and queue storage. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                 Mobile: inject the platform sandbox file API."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for asset downloads. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Mobile: inject the platform HTTP stack."
            .to_string(),
    }
}

fn remote_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "RemoteStore".to_string(),
        message: "RemoteStore implementation is required for emergency delivery. \
                 Inject one with .remote_store(), or with 'desktop-shims' set .remote_base_url()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(cache_dir: &Path, data_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::with_directories(
        cache_dir.to_path_buf(),
        data_dir.to_path_buf(),
    ));
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_cache_dir: &Path, _data_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_remote_store(
    http: &Arc<dyn HttpClient>,
    base_url: Option<String>,
) -> Result<Arc<dyn RemoteStore>> {
    use bridge_desktop::HttpRemoteStore;

    let base_url = base_url.ok_or_else(remote_store_missing_error)?;
    let store: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(Arc::clone(http), base_url));
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_remote_store(
    _http: &Arc<dyn HttpClient>,
    _base_url: Option<String>,
) -> Result<Arc<dyn RemoteStore>> {
    Err(remote_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    http_client: Option<Arc<dyn HttpClient>>,
    remote_store: Option<Arc<dyn RemoteStore>>,
    remote_base_url: Option<String>,
    video_cache_bytes: Option<u64>,
    image_disk_bytes: Option<u64>,
    memory_budget_bytes: Option<u64>,
    emergency_collection: Option<String>,
    image_retry_base_delay: Option<Duration>,
}

impl CoreConfigBuilder {
    /// Sets the cache root. Required.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the data root.
    ///
    /// Default: the cache root
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the file system bridge.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the HTTP client bridge.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the remote store bridge.
    pub fn remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote_store = Some(store);
        self
    }

    /// Base URL for the desktop REST remote store.
    ///
    /// Only consulted with the `desktop-shims` feature when no
    /// [`remote_store`](Self::remote_store) was injected.
    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.remote_base_url = Some(url.into());
        self
    }

    /// Sets the video cache capacity.
    ///
    /// Default: 70 MiB
    pub fn video_cache_bytes(mut self, bytes: u64) -> Self {
        self.video_cache_bytes = Some(bytes);
        self
    }

    /// Sets the image disk tier capacity.
    ///
    /// Default: 50 MiB
    pub fn image_disk_bytes(mut self, bytes: u64) -> Self {
        self.image_disk_bytes = Some(bytes);
        self
    }

    /// Sets the memory budget. The image memory tier takes 25% of it.
    ///
    /// Default: 256 MiB
    pub fn memory_budget_bytes(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Sets the remote collection emergency records are written to.
    ///
    /// Default: `"emergencies"`
    pub fn emergency_collection(mut self, collection: impl Into<String>) -> Self {
        self.emergency_collection = Some(collection.into());
        self
    }

    /// Sets the base delay between image download attempts.
    ///
    /// Default: 1 second
    pub fn image_retry_base_delay(mut self, delay: Duration) -> Self {
        self.image_retry_base_delay = Some(delay);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if:
    /// - The cache directory is missing
    /// - Required bridges are missing and no desktop default applies
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;
        let data_dir = self.data_dir.unwrap_or_else(|| cache_dir.clone());

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir, &data_dir)?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let remote_store = match self.remote_store {
            Some(store) => store,
            None => provide_default_remote_store(&http_client, self.remote_base_url)?,
        };

        let config = CoreConfig {
            cache_dir,
            data_dir,
            file_system,
            http_client,
            remote_store,
            video_cache_bytes: self.video_cache_bytes.unwrap_or(DEFAULT_VIDEO_CACHE_BYTES),
            image_disk_bytes: self.image_disk_bytes.unwrap_or(DEFAULT_IMAGE_DISK_BYTES),
            memory_budget_bytes: self
                .memory_budget_bytes
                .unwrap_or(DEFAULT_MEMORY_BUDGET_BYTES),
            emergency_collection: self
                .emergency_collection
                .unwrap_or_else(|| DEFAULT_EMERGENCY_COLLECTION.to_string()),
            image_retry_base_delay: self
                .image_retry_base_delay
                .unwrap_or(DEFAULT_IMAGE_RETRY_BASE_DELAY),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::remote::{CreateRecord, RecordId, RemoteRecord};
    use bridge_traits::storage::FileMetadata;
    use bridge_traits::BridgeError;
    use bytes::Bytes;
    use futures::stream::{self, BoxStream, StreamExt};

    /// Refuses every operation; building a config never touches the file system.
    struct NoopFileSystem;

    fn unavailable<T>() -> BridgeResult<T> {
        Err(BridgeError::NotAvailable("noop file system".to_string()))
    }

    #[async_trait]
    impl FileSystemAccess for NoopFileSystem {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            unavailable()
        }
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            unavailable()
        }
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            unavailable()
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            unavailable()
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            unavailable()
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            unavailable()
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            unavailable()
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            unavailable()
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            unavailable()
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            unavailable()
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            unavailable()
        }
        async fn open_write_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
            unavailable()
        }
    }

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("http".to_string()))
        }

        async fn download_stream(
            &self,
            _url: String,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Err(BridgeError::NotAvailable("http".to_string()))
        }
    }

    struct MockRemoteStore;

    #[async_trait]
    impl RemoteStore for MockRemoteStore {
        async fn create_record(&self, request: CreateRecord) -> BridgeResult<RecordId> {
            Ok(RecordId::new(request.idempotency_key.unwrap_or_default()))
        }

        async fn subscribe(
            &self,
            _path: &str,
        ) -> BridgeResult<BoxStream<'static, BridgeResult<Vec<RemoteRecord>>>> {
            Ok(stream::empty().boxed())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .cache_dir("/cache")
            .file_system(Arc::new(NoopFileSystem))
            .http_client(Arc::new(MockHttpClient))
            .remote_store(Arc::new(MockRemoteStore))
    }

    #[test]
    fn test_builder_requires_cache_dir() {
        let result = CoreConfig::builder()
            .file_system(Arc::new(NoopFileSystem))
            .http_client(Arc::new(MockHttpClient))
            .remote_store(Arc::new(MockRemoteStore))
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Cache directory is required"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_file_system() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .http_client(Arc::new(MockHttpClient))
            .remote_store(Arc::new(MockRemoteStore))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "FileSystemAccess")
            }
            other => panic!("expected missing capability, got {:?}", other),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .file_system(Arc::new(NoopFileSystem))
            .remote_store(Arc::new(MockRemoteStore))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("HttpClient"));
        assert!(err_msg.contains("asset downloads"));
    }

    #[test]
    fn test_builder_requires_remote_store() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .file_system(Arc::new(NoopFileSystem))
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => assert_eq!(capability, "RemoteStore"),
            other => panic!("expected missing capability, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_with_remote_base_url() {
        let root = std::env::temp_dir().join("safety-core-config-test");
        let config = CoreConfig::builder()
            .cache_dir(root.join("cache"))
            .data_dir(root.join("data"))
            .remote_base_url("https://api.example.com/v1")
            .build()
            .expect("desktop defaults should succeed");

        assert_eq!(config.emergency_queue_dir(), root.join("data").join("emergency_queue"));
    }

    #[test]
    fn test_builder_applies_defaults() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/cache"));
        assert_eq!(config.data_dir, PathBuf::from("/cache"));
        assert_eq!(config.video_cache_bytes, 70 * 1024 * 1024);
        assert_eq!(config.image_disk_bytes, 50 * 1024 * 1024);
        assert_eq!(config.memory_budget_bytes, 256 * 1024 * 1024);
        assert_eq!(config.emergency_collection, "emergencies");
        assert_eq!(config.image_retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.video_cache_dir(), PathBuf::from("/cache/video_cache"));
        assert_eq!(config.image_cache_dir(), PathBuf::from("/cache/image_cache"));
    }

    #[test]
    fn test_builder_with_custom_sizes() {
        let config = complete_builder()
            .data_dir("/data")
            .video_cache_bytes(1024)
            .image_disk_bytes(2048)
            .memory_budget_bytes(4096)
            .emergency_collection("sos")
            .image_retry_base_delay(Duration::from_millis(5))
            .build()
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.video_cache_bytes, 1024);
        assert_eq!(config.image_disk_bytes, 2048);
        assert_eq!(config.memory_budget_bytes, 4096);
        assert_eq!(config.emergency_collection, "sos");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let result = complete_builder().video_cache_bytes(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be greater than 0"));
    }

    #[test]
    fn test_validate_rejects_excessive_capacity() {
        let result = complete_builder().image_disk_bytes(200_000 * MIB).build();
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_rejects_blank_collection() {
        let result = complete_builder().emergency_collection("  ").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = complete_builder().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("RemoteStore { ... }"));
        assert!(rendered.contains("video_cache_bytes"));
    }
}
