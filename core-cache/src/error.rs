use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Invalid cache configuration: {0}")]
    Configuration(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl CacheError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Network(_))
    }

    pub(crate) fn storage(context: &str, error: impl std::fmt::Display) -> Self {
        CacheError::Storage(format!("{}: {}", context, error))
    }

    pub(crate) fn network(error: impl std::fmt::Display) -> Self {
        CacheError::Network(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(CacheError::Network("timeout".into()).is_retryable());
        assert!(!CacheError::Storage("disk full".into()).is_retryable());
        assert!(!CacheError::Decode("bad png".into()).is_retryable());
        assert!(!CacheError::Bridge(BridgeError::NotAvailable("fs".into())).is_retryable());
    }

    #[test]
    fn test_storage_error_keeps_context() {
        let err = CacheError::storage("Failed to rename blob", "permission denied");
        assert_eq!(
            err.to_string(),
            "Storage error: Failed to rename blob: permission denied"
        );
    }
}
