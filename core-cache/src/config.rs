//! Cache configuration.

use crate::error::{CacheError, Result};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Configuration for [`BinaryAssetCache`](crate::BinaryAssetCache).
#[derive(Debug, Clone)]
pub struct AssetCacheConfig {
    /// Directory holding the blobs and `metadata.json`
    pub root: PathBuf,

    /// Maximum total size of cached assets (default: 70 MiB)
    pub capacity_bytes: u64,

    /// Read buffer used while streaming a download to disk (default: 64 KiB)
    pub stream_buffer_bytes: usize,
}

impl AssetCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity_bytes: 70 * MIB,
            stream_buffer_bytes: 64 * 1024,
        }
    }

    /// Set maximum cache size.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    pub fn with_stream_buffer(mut self, bytes: usize) -> Self {
        self.stream_buffer_bytes = bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(CacheError::Configuration(
                "cache root cannot be empty".to_string(),
            ));
        }

        if self.capacity_bytes == 0 {
            return Err(CacheError::Configuration(
                "capacity_bytes must be greater than 0".to_string(),
            ));
        }

        if self.stream_buffer_bytes == 0 {
            return Err(CacheError::Configuration(
                "stream_buffer_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Encoding used for images stored in the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskImageFormat {
    /// Lossless
    #[default]
    Png,
    /// Smaller, drops alpha
    Jpeg,
}

/// Configuration for [`TieredImageCache`](crate::TieredImageCache).
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    /// Directory holding the disk tier
    pub root: PathBuf,

    /// Maximum total size of the disk tier (default: 50 MiB)
    pub disk_capacity_bytes: u64,

    /// Maximum decoded footprint of the memory tier (default: 64 MiB)
    pub memory_capacity_bytes: u64,

    /// Download attempts per miss (default: 3)
    pub max_attempts: u32,

    /// Delay before retry `n` is `n * retry_base_delay` (default: 1s)
    pub retry_base_delay: Duration,

    /// Bounds used by `load_image` (default: 800x600)
    pub default_max_width: u32,
    pub default_max_height: u32,

    /// Disk tier encoding (default: PNG)
    pub disk_format: DiskImageFormat,

    /// Largest width or height accepted by the decoder (default: 16384)
    pub max_decode_dimension: u32,

    /// Largest allocation the decoder may make (default: 256 MiB)
    pub max_decode_alloc_bytes: u64,
}

impl ImageCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            disk_capacity_bytes: 50 * MIB,
            memory_capacity_bytes: 64 * MIB,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            default_max_width: 800,
            default_max_height: 600,
            disk_format: DiskImageFormat::Png,
            max_decode_dimension: 16_384,
            max_decode_alloc_bytes: 256 * MIB,
        }
    }

    /// Set disk tier size.
    pub fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity_bytes = bytes;
        self
    }

    /// Set memory tier size directly.
    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity_bytes = bytes;
        self
    }

    /// Size the memory tier as a quarter of the process memory budget.
    pub fn with_memory_budget(mut self, budget_bytes: u64) -> Self {
        self.memory_capacity_bytes = budget_bytes / 4;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_default_bounds(mut self, max_width: u32, max_height: u32) -> Self {
        self.default_max_width = max_width;
        self.default_max_height = max_height;
        self
    }

    pub fn with_disk_format(mut self, format: DiskImageFormat) -> Self {
        self.disk_format = format;
        self
    }

    pub fn with_decode_limits(mut self, max_dimension: u32, max_alloc_bytes: u64) -> Self {
        self.max_decode_dimension = max_dimension;
        self.max_decode_alloc_bytes = max_alloc_bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(CacheError::Configuration(
                "cache root cannot be empty".to_string(),
            ));
        }

        if self.disk_capacity_bytes == 0 || self.memory_capacity_bytes == 0 {
            return Err(CacheError::Configuration(
                "tier capacities must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(CacheError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.default_max_width == 0 || self.default_max_height == 0 {
            return Err(CacheError::Configuration(
                "default bounds must be at least 1x1".to_string(),
            ));
        }

        if self.max_decode_dimension == 0 {
            return Err(CacheError::Configuration(
                "max_decode_dimension must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_defaults() {
        let config = AssetCacheConfig::new("/cache/video_cache");
        assert_eq!(config.capacity_bytes, 70 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_asset_rejects_zero_capacity() {
        let config = AssetCacheConfig::new("/cache/video_cache").with_capacity(0);
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_image_defaults() {
        let config = ImageCacheConfig::new("/cache/image_cache");
        assert_eq!(config.disk_capacity_bytes, 50 * 1024 * 1024);
        assert_eq!(config.memory_capacity_bytes, 64 * 1024 * 1024);
        assert_eq!(config.max_attempts, 3);
        assert_eq!((config.default_max_width, config.default_max_height), (800, 600));
        assert_eq!(config.disk_format, DiskImageFormat::Png);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_budget_quarter() {
        let config = ImageCacheConfig::new("/c").with_memory_budget(400);
        assert_eq!(config.memory_capacity_bytes, 100);
    }

    #[test]
    fn test_image_rejects_invalid_values() {
        assert!(ImageCacheConfig::new("/c").with_max_attempts(0).validate().is_err());
        assert!(ImageCacheConfig::new("/c").with_default_bounds(0, 10).validate().is_err());
        assert!(ImageCacheConfig::new("").validate().is_err());
        assert!(ImageCacheConfig::new("/c").with_memory_budget(3).validate().is_err());
    }
}
