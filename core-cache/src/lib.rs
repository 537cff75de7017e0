//! # Core Cache
//!
//! Bounded on-disk caches and the durable record store they share a
//! storage discipline with.
//!
//! ## Overview
//!
//! - [`KeyHasher`] turns URLs and ids into stable file names
//! - [`DurableRecordStore`] keeps one JSON file per record plus an index
//! - [`DiskLruIndex`] tracks blob sizes and recency for a bounded directory
//! - [`BinaryAssetCache`] streams large downloads (videos) into a disk LRU
//! - [`TieredImageCache`] keeps downsampled images in a memory LRU in front
//!   of a disk LRU
//!
//! Every write lands in a temporary file first and is renamed into place, so
//! a crash never leaves a half-written blob or record under its final name.
//! Indexes are rebuilt from the directory listing when a cache is opened.
//!
//! ## Usage
//!
//! ```ignore
//! use core_cache::{AssetCacheConfig, BinaryAssetCache};
//! use std::sync::Arc;
//!
//! let videos = BinaryAssetCache::open(
//!     fs.clone(),
//!     http.clone(),
//!     AssetCacheConfig::new(cache_dir.join("video_cache")),
//! )
//! .await?;
//!
//! let handle = videos.fetch("https://cdn.example.com/intro.mp4").await?;
//! player.play_file(&handle.path);
//! ```

mod atomic;
mod disk;
mod inflight;

pub mod asset;
pub mod config;
pub mod error;
pub mod image_cache;
pub mod index;
pub mod key;
pub mod record_store;

pub use asset::{AssetHandle, BinaryAssetCache};
pub use config::{AssetCacheConfig, DiskImageFormat, ImageCacheConfig};
pub use error::{CacheError, Result};
pub use image_cache::{downsample, CachedImage, ImageCacheStats, TieredImageCache};
pub use index::{CacheEntry, CacheStats, DiskLruIndex};
pub use key::KeyHasher;
pub use record_store::DurableRecordStore;
