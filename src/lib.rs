//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates (`core-service`, `core-cache`, `core-sync`). Host applications can
//! depend on `safety-core-workspace` and enable the documented features without
//! wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;

#[cfg(feature = "cache-only")]
pub use core_cache as cache;

#[cfg(feature = "sync-only")]
pub use core_sync as sync;
