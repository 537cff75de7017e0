//! # Emergency Records
//!
//! The safety report payload and the queue that delivers it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;
use crate::queue::DurableWriteQueue;

/// Queue of emergency reports awaiting delivery
pub type EmergencyQueue = DurableWriteQueue<EmergencyRecord>;

fn default_kind() -> String {
    "unspecified".to_string()
}

/// An emergency report as sent to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    /// Category such as `"fall"` or `"medical"`
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub reporter_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub reported_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl EmergencyRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            latitude: None,
            longitude: None,
            reporter_id: None,
            reported_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_reporter(mut self, reporter_id: impl Into<String>) -> Self {
        self.reporter_id = Some(reporter_id.into());
        self
    }

    pub fn with_reported_at(mut self, reported_at: DateTime<Utc>) -> Self {
        self.reported_at = reported_at;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl DurableWriteQueue<EmergencyRecord> {
    /// Queue a report for delivery. Contents are stored as given.
    pub async fn report(&self, record: EmergencyRecord) -> Result<Uuid> {
        self.enqueue(record).await
    }

    /// Whether any report is still waiting to be delivered.
    pub async fn has_pending_emergencies(&self) -> bool {
        self.has_pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WriteQueueConfig;
    use async_trait::async_trait;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::remote::{CreateRecord, RecordId, RemoteRecord, RemoteStore};
    use futures::stream::{self, BoxStream, StreamExt};
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl RemoteStore for Unreachable {
        async fn create_record(&self, _request: CreateRecord) -> BridgeResult<RecordId> {
            Err(BridgeError::OperationFailed("offline".to_string()))
        }

        async fn subscribe(
            &self,
            _path: &str,
        ) -> BridgeResult<BoxStream<'static, BridgeResult<Vec<RemoteRecord>>>> {
            Ok(stream::empty().boxed())
        }
    }

    #[test]
    fn test_minimal_json_gets_defaults() {
        let record: EmergencyRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record.kind, "unspecified");
        assert!(record.message.is_none());
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let record = EmergencyRecord::new("medical")
            .with_message("chest pain")
            .with_reporter("user-7")
            .with_attribute("floor", "3");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["kind"], "medical");
        assert_eq!(json["message"], "chest pain");
        assert_eq!(json["reporter_id"], "user-7");
        assert_eq!(json["attributes"]["floor"], "3");
        assert!(json["latitude"].is_null());
    }

    #[tokio::test]
    async fn test_report_queues_contents_as_given() {
        let dir = tempfile::tempdir().unwrap();
        let queue: EmergencyQueue = DurableWriteQueue::open(
            Arc::new(TokioFileSystem::rooted_at(dir.path())),
            Arc::new(Unreachable),
            WriteQueueConfig::new(dir.path().join("emergency_queue"), "emergencies"),
        )
        .await
        .unwrap();

        assert!(!queue.has_pending_emergencies().await);

        // partial or unusual location data is still a report worth sending
        let mut partial = EmergencyRecord::new("fall");
        partial.latitude = Some(91.0);
        let id = queue.report(partial.clone()).await.unwrap();

        assert!(queue.has_pending_emergencies().await);
        assert_eq!(queue.get(id).await.unwrap().payload, partial);
    }
}
