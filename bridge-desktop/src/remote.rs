//! JSON REST implementation of [`RemoteStore`].
//!
//! `POST {base}/{collection}` creates a record, `GET {base}/{path}` returns the
//! current list. Subscriptions poll.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest},
    remote::{CreateRecord, RecordId, RemoteRecord, RemoteStore},
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Remote store speaking a minimal JSON REST dialect over any [`HttpClient`].
pub struct HttpRemoteStore {
    http: Arc<dyn HttpClient>,
    base_url: String,
    bearer_token: Option<String>,
    poll_interval: Duration,
}

impl HttpRemoteStore {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match &self.bearer_token {
            Some(token) => request.bearer_token(token.clone()),
            None => request,
        }
    }

    async fn fetch_list(
        http: &dyn HttpClient,
        request: HttpRequest,
    ) -> Result<Vec<RemoteRecord>> {
        http.execute(request).await?.error_for_status()?.json()
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_record(&self, request: CreateRecord) -> Result<RecordId> {
        if request.collection.trim().is_empty() {
            return Err(BridgeError::OperationFailed(
                "collection path cannot be empty".to_string(),
            ));
        }

        let mut http_request = HttpRequest::new(HttpMethod::Post, self.url_for(&request.collection))
            .json(&request.payload)?;
        if let Some(key) = &request.idempotency_key {
            http_request = http_request.header("Idempotency-Key", key.clone());
        }

        let response = self
            .http
            .execute(self.authorize(http_request))
            .await?
            .error_for_status()?;

        // 201/204 with no body is still a delivered record
        let returned_id = if response.body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            match response.json::<CreateResponse>() {
                Ok(created) => created.id,
                Err(e) => {
                    warn!(status = response.status, error = %e, "Unreadable create response body");
                    None
                }
            }
        };
        let id = returned_id
            .or(request.idempotency_key)
            .ok_or_else(|| {
                BridgeError::OperationFailed("create response did not include an id".to_string())
            })?;

        debug!(collection = %request.collection, record_id = %id, "Remote record created");
        Ok(RecordId(id))
    }

    async fn subscribe(
        &self,
        path: &str,
    ) -> Result<BoxStream<'static, Result<Vec<RemoteRecord>>>> {
        let http = Arc::clone(&self.http);
        let request = self.authorize(HttpRequest::new(HttpMethod::Get, self.url_for(path)));
        let interval = self.poll_interval;

        let snapshots = stream::unfold(true, move |first| {
            let http = Arc::clone(&http);
            let request = request.clone();
            async move {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                let result = Self::fetch_list(http.as_ref(), request).await;
                if let Err(e) = &result {
                    warn!(error = %e, "Subscription poll failed");
                }
                Some((result, false))
            }
        });

        Ok(snapshots.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingHttp {
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
        body: &'static str,
    }

    impl RecordingHttp {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                status,
                body,
            }
        }
    }

    #[async_trait]
    impl HttpClient for RecordingHttp {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }

        async fn download_stream(
            &self,
            _url: String,
        ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Err(BridgeError::NotAvailable("download_stream".to_string()))
        }
    }

    #[tokio::test]
    async fn test_create_record_posts_json_with_idempotency_key() {
        let http = Arc::new(RecordingHttp::new(201, r#"{"id":"remote-1"}"#));
        let store = HttpRemoteStore::new(http.clone(), "https://api.example.com/v1/");

        let id = store
            .create_record(
                CreateRecord::new("emergencies", serde_json::json!({"kind": "fall"}))
                    .with_idempotency_key("q-1"),
            )
            .await
            .unwrap();

        assert_eq!(id.as_str(), "remote-1");
        let requests = http.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url, "https://api.example.com/v1/emergencies");
        assert_eq!(
            requests[0].headers.get("Idempotency-Key"),
            Some(&"q-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_record_falls_back_to_idempotency_key() {
        let http = Arc::new(RecordingHttp::new(200, "{}"));
        let store = HttpRemoteStore::new(http, "https://api.example.com");

        let id = store
            .create_record(
                CreateRecord::new("emergencies", serde_json::json!({})).with_idempotency_key("q-2"),
            )
            .await
            .unwrap();
        assert_eq!(id.as_str(), "q-2");
    }

    #[tokio::test]
    async fn test_create_record_accepts_empty_success_body() {
        for status in [201, 204] {
            let http = Arc::new(RecordingHttp::new(status, ""));
            let store = HttpRemoteStore::new(http.clone(), "https://api.example.com");

            let id = store
                .create_record(
                    CreateRecord::new("emergencies", serde_json::json!({"kind": "fall"}))
                        .with_idempotency_key("q-3"),
                )
                .await
                .unwrap();
            assert_eq!(id.as_str(), "q-3");
            assert_eq!(http.requests.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_create_record_surfaces_http_errors() {
        let http = Arc::new(RecordingHttp::new(503, "down"));
        let store = HttpRemoteStore::new(http, "https://api.example.com");

        let err = store
            .create_record(CreateRecord::new("emergencies", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_subscribe_yields_first_snapshot_immediately() {
        let http = Arc::new(RecordingHttp::new(
            200,
            r#"[{"id":"a","data":{"kind":"fire"}},{"id":"b"}]"#,
        ));
        let store = HttpRemoteStore::new(http, "https://api.example.com")
            .with_poll_interval(Duration::from_secs(3600));

        let mut stream = store.subscribe("emergencies").await.unwrap();
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id.as_str(), "a");
        assert_eq!(snapshot[0].data["kind"], "fire");
    }
}
