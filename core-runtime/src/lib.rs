//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the cache and sync crates:
//! - Logging and tracing bootstrap
//! - `CoreConfig` construction and validation
//!
//! ## Overview
//!
//! Nothing in here owns state beyond the global tracing subscriber. The
//! composition root in `core-service` consumes a [`config::CoreConfig`] and
//! wires the managers from it.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
