//! Remote Record Store Abstraction
//!
//! The hosted document/real-time database the application writes safety
//! records to. Implementations translate these calls into whatever SDK or REST
//! API the host uses.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier assigned to a record by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A create-record call.
///
/// `idempotency_key` is a client-generated identifier. Stores that support
/// client-supplied ids should use it so that a retried create after a lost
/// acknowledgement does not produce a duplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRecord {
    pub collection: String,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
}

impl CreateRecord {
    pub fn new(collection: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            collection: collection.into(),
            idempotency_key: None,
            payload,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A record as delivered by a subscription snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Remote store trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::remote::{CreateRecord, RemoteStore};
///
/// async fn report(store: &dyn RemoteStore, payload: serde_json::Value) -> Result<()> {
///     let id = store.create_record(CreateRecord::new("emergencies", payload)).await?;
///     println!("stored as {}", id);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a record in `request.collection`
    ///
    /// Returns the remote identifier once the store has acknowledged the
    /// write. Any error means the write must be considered not delivered.
    async fn create_record(&self, request: CreateRecord) -> Result<RecordId>;

    /// Subscribe to snapshots of the records under `path`
    ///
    /// Each item is the full current list of records.
    async fn subscribe(
        &self,
        path: &str,
    ) -> Result<BoxStream<'static, Result<Vec<RemoteRecord>>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_record_builder() {
        let request = CreateRecord::new("emergencies", serde_json::json!({"kind": "fall"}))
            .with_idempotency_key("abc");

        assert_eq!(request.collection, "emergencies");
        assert_eq!(request.idempotency_key.as_deref(), Some("abc"));
        assert_eq!(request.payload["kind"], "fall");
    }

    #[test]
    fn test_remote_record_defaults_missing_data() {
        let record: RemoteRecord = serde_json::from_str(r#"{"id":"r1"}"#).unwrap();
        assert_eq!(record.id.as_str(), "r1");
        assert!(record.data.is_null());
    }
}
