use core_cache::CacheError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid queue configuration: {0}")]
    Configuration(String),
}

impl From<CacheError> for SyncError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Configuration(message) => SyncError::Configuration(message),
            other => SyncError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_errors_map_to_sync_errors() {
        assert!(matches!(
            SyncError::from(CacheError::Storage("disk full".into())),
            SyncError::Storage(_)
        ));
        assert!(matches!(
            SyncError::from(CacheError::Configuration("bad id".into())),
            SyncError::Configuration(_)
        ));
        assert!(matches!(
            SyncError::from(CacheError::Decode("not an image".into())),
            SyncError::Storage(_)
        ));
    }
}
