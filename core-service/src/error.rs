use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Cache error: {0}")]
    Cache(#[from] core_cache::CacheError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Remote store error: {0}")]
    Remote(#[from] BridgeError),
}

impl From<core_runtime::Error> for CoreError {
    fn from(error: core_runtime::Error) -> Self {
        match error {
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => CoreError::CapabilityMissing {
                capability,
                message,
            },
            other => CoreError::InitializationFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
