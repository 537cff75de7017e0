//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the offline persistence core and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that is provided differently per platform.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP requests and streaming downloads
//! - [`FileSystemAccess`](storage::FileSystemAccess) - App-private file I/O
//! - [`RemoteStore`](remote::RemoteStore) - Hosted record store (create + subscribe)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | iOS      | host-provided       |
//! | Android  | host-provided       |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError` and
//! include context (file paths, HTTP status) in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! by every manager across async tasks.

pub mod error;
pub mod http;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use remote::{CreateRecord, RecordId, RemoteRecord, RemoteStore};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
