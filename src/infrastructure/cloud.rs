//! Cloud sink adapters and connectivity checks.
//!
//! The remote store is an id-keyed document collection; both adapters
//! treat an upsert of an already-present id as an overwrite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::domain::sync::CloudConfig;
use crate::domain::{AppError, CloudSink, Message, Reachability, Result, SyncState};

/// Batch body sent to the remote store.
#[derive(Debug, Serialize)]
struct BatchUpsert<'a> {
    messages: &'a [Message],
}

/// Cloud sink speaking JSON over HTTP.
pub struct HttpCloudSink {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpCloudSink {
    /// Build a sink for the configured endpoint.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(endpoint: &str, config: &CloudConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(AppError::cloud)?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl CloudSink for HttpCloudSink {
    async fn upsert_batch(&self, messages: &[Message]) -> Result<()> {
        let url = format!("{}/messages/batch", self.endpoint);
        let body = BatchUpsert { messages };

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(AppError::cloud)?;

        if !response.status().is_success() {
            return Err(AppError::CloudSink {
                message: format!("batch upsert rejected with status {}", response.status()),
                source: None,
            });
        }

        tracing::debug!(count = messages.len(), url = %url, "Batch committed to cloud");
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Message>> {
        let url = format!("{}/messages", self.endpoint);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(AppError::cloud)?
            .error_for_status()
            .map_err(AppError::cloud)?;

        response.json().await.map_err(AppError::cloud)
    }
}

/// In-process sink keyed by message id.
///
/// Placeholder when no endpoint is configured (always behind an offline
/// reachability); also the test double.
#[derive(Default)]
pub struct MemoryCloudSink {
    records: Mutex<BTreeMap<String, Message>>,
    batch_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryCloudSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `upsert_batch` calls received.
    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct records held.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::CloudSink {
                message: "sink unavailable".into(),
                source: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CloudSink for MemoryCloudSink {
    async fn upsert_batch(&self, messages: &[Message]) -> Result<()> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;

        let mut records = self.records.lock().await;
        for message in messages {
            let mut stored = message.clone();
            stored.sync_state = SyncState::Synced;
            records.insert(stored.id.clone(), stored);
        }
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Message>> {
        self.check_failing()?;
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

/// Reachability via a TCP connect to a well-known host.
pub struct TcpReachability {
    target: String,
    timeout: Duration,
}

impl TcpReachability {
    #[must_use]
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &CloudConfig) -> Self {
        Self::new(
            config.reachability_target.clone(),
            Duration::from_millis(config.reachability_timeout_ms),
        )
    }
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.target, error = %e, "Connectivity check failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.target, "Connectivity check timed out");
                false
            }
        }
    }
}

/// Reachability with a settable answer.
pub struct StaticReachability {
    online: AtomicBool,
}

impl StaticReachability {
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reachability for StaticReachability {
    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::Utc;

    use crate::domain::Recipient;

    fn msg(id: &str) -> Message {
        Message::new(id, "hi", "alice", Recipient::Broadcast, Utc::now())
    }

    #[tokio::test]
    async fn test_memory_sink_upsert_is_keyed_by_id() {
        let sink = MemoryCloudSink::new();

        sink.upsert_batch(&[msg("m1"), msg("m2")]).await.unwrap();
        sink.upsert_batch(&[msg("m1")]).await.unwrap();

        assert_eq!(sink.len().await, 2);
        assert_eq!(sink.batch_calls(), 2);
        assert!(sink.fetch_all().await.unwrap().iter().all(Message::is_synced));
    }

    #[tokio::test]
    async fn test_memory_sink_failure_toggle() {
        let sink = MemoryCloudSink::new();
        sink.set_failing(true);

        assert!(sink.upsert_batch(&[msg("m1")]).await.is_err());
        assert_eq!(sink.len().await, 0);

        sink.set_failing(false);
        assert!(sink.upsert_batch(&[msg("m1")]).await.is_ok());
    }

    /// What a throwaway remote store saw.
    #[derive(Default)]
    struct Remote {
        batches: std::sync::Mutex<Vec<serde_json::Value>>,
        authorization: std::sync::Mutex<Option<String>>,
    }

    async fn accept_batch(
        State(remote): State<Arc<Remote>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        *remote.authorization.lock().unwrap() = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        remote.batches.lock().unwrap().push(body);
        StatusCode::OK
    }

    async fn list_batched(State(remote): State<Arc<Remote>>) -> Json<serde_json::Value> {
        let batches = remote.batches.lock().unwrap();
        Json(
            batches
                .first()
                .map_or_else(|| serde_json::json!([]), |b| b["messages"].clone()),
        )
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_http_sink_posts_batch_with_token() {
        let remote = Arc::new(Remote::default());
        let endpoint = serve(
            Router::new()
                .route("/messages/batch", post(accept_batch))
                .route("/messages", get(list_batched))
                .with_state(Arc::clone(&remote)),
        )
        .await;
        let config = CloudConfig {
            api_token: Some("secret".into()),
            ..CloudConfig::default()
        };
        let sink = HttpCloudSink::new(&endpoint, &config).unwrap();

        sink.upsert_batch(&[msg("m1"), msg("m2")]).await.unwrap();

        {
            let batches = remote.batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0]["messages"].as_array().unwrap().len(), 2);
            assert_eq!(batches[0]["messages"][0]["id"], "m1");
        }
        assert_eq!(
            remote.authorization.lock().unwrap().as_deref(),
            Some("Bearer secret")
        );

        let fetched = sink.fetch_all().await.unwrap();
        let ids: Vec<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_http_sink_server_error_is_cloud_error() {
        let endpoint = serve(
            Router::new()
                .route("/messages/batch", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
                .route("/messages", get(|| async { StatusCode::INTERNAL_SERVER_ERROR })),
        )
        .await;
        let sink = HttpCloudSink::new(&endpoint, &CloudConfig::default()).unwrap();

        assert!(matches!(
            sink.upsert_batch(&[msg("m1")]).await,
            Err(AppError::CloudSink { .. })
        ));
        assert!(matches!(
            sink.fetch_all().await,
            Err(AppError::CloudSink { .. })
        ));
    }

    #[tokio::test]
    async fn test_static_reachability() {
        let reachability = StaticReachability::new(false);
        assert!(!reachability.is_reachable().await);
        reachability.set_online(true);
        assert!(reachability.is_reachable().await);
    }

    #[tokio::test]
    async fn test_tcp_reachability_unroutable_target() {
        // Port 9 on localhost is not expected to accept connections.
        let reachability = TcpReachability::new("127.0.0.1:9", Duration::from_millis(200));
        assert!(!reachability.is_reachable().await);
    }
}
