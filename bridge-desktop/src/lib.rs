//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux), used by desktop builds and by the test suites.
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`
//! - `HttpClient` using `reqwest`
//! - `RemoteStore` as a small JSON REST client layered on any `HttpClient`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HttpRemoteStore, ReqwestHttpClient, TokioFileSystem};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let http = Arc::new(ReqwestHttpClient::new());
//!     let fs = Arc::new(TokioFileSystem::new());
//!     let remote = Arc::new(HttpRemoteStore::new(http.clone(), "https://api.example.com/v1"));
//!
//!     // Hand these to core_runtime::config::CoreConfig::builder()
//! }
//! ```

mod filesystem;
mod http;
mod remote;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use remote::HttpRemoteStore;
