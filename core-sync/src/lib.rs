//! # Core Sync
//!
//! Offline-first delivery of records to the remote store.
//!
//! ## Overview
//!
//! - [`DurableWriteQueue`] persists writes locally and delivers them when a
//!   drain is triggered, with a bounded number of attempts per write
//! - [`EmergencyQueue`] is the queue instantiated for [`EmergencyRecord`]s
//!
//! Connectivity detection is left to the host: it calls
//! [`DurableWriteQueue::drain`] when the network comes back.

pub mod emergency;
pub mod error;
pub mod queue;

pub use emergency::{EmergencyQueue, EmergencyRecord};
pub use error::{Result, SyncError};
pub use queue::{
    DurableWriteQueue, QueuedWrite, SyncResult, WriteQueueConfig, WriteStatus, MAX_RETRY,
};
