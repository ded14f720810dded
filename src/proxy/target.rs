// src/proxy/target.rs
use super::error::RemoteError;
use super::merge;
use crate::config::TargetConfig;
use crate::metrics::{MetricsCollector, Timer};
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const METADATA_ACCEPT: &str = "application/json;metadata=true";

/// Last known state of a remote peer.
#[derive(Debug, Clone)]
pub struct TargetState {
    pub data: Value,
    pub metadata: Value,
    pub last_update: Option<DateTime<Utc>>,
    pub status_code: u16,
    pub error: String,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            metadata: Value::Object(Map::new()),
            last_update: None,
            status_code: 0,
            error: "OK".to_string(),
        }
    }
}

/// Status leaf exposed for each target.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetStatus {
    pub url: String,
    pub status_code: u16,
    pub error: String,
    pub last_update: String,
}

/// Subtree at one path paired with the outcome of the call that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetView {
    pub subtree: Value,
    pub status_code: u16,
    pub error: String,
}

impl TargetView {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

pub struct ProxyTarget {
    pub name: String,
    pub url: Url,
    pub request_timeout: Duration,

    client: Client,
    // Held for the whole remote call so merges on one target never overlap.
    state: Mutex<TargetState>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ProxyTarget {
    pub fn new(
        config: &TargetConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> reqwest::Result<Self> {
        let request_timeout = config.request_timeout();
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            request_timeout,
            client,
            state: Mutex::new(TargetState::default()),
            metrics,
        })
    }

    /// Full URL of `path` on this target. The path is appended to the base URL verbatim.
    pub fn request_url(&self, path: &str) -> String {
        let base = self.url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{}/", base)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Fetch `path` from the remote peer and merge the response into the
    /// data (or metadata) tree.
    pub async fn remote_get(&self, path: &str, want_metadata: bool) {
        let accept = if want_metadata { METADATA_ACCEPT } else { JSON_CONTENT_TYPE };
        let request = self
            .client
            .get(self.request_url(path))
            .header(ACCEPT, accept);

        self.execute("GET", request, path, want_metadata).await;
    }

    /// Push `payload` to `path` on the remote peer. The peer's response body,
    /// not the payload, is merged into the data tree.
    pub async fn remote_set(&self, path: &str, payload: &Value) {
        let request = self
            .client
            .put(self.request_url(path))
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.to_string());

        self.execute("PUT", request, path, false).await;
    }

    async fn execute(&self, method: &str, request: RequestBuilder, path: &str, want_metadata: bool) {
        let mut state = self.state.lock().await;
        let timer = Timer::new();

        debug!(target_name = %self.name, %method, %path, want_metadata, "sending remote request");
        let outcome = self.send(request).await;

        match outcome {
            Ok((status_code, body)) => {
                let tree = if want_metadata { &mut state.metadata } else { &mut state.data };
                merge::merge_at(tree, path, body);
                state.status_code = status_code;
                state.error = "OK".to_string();
            }
            Err(err) => {
                warn!(target_name = %self.name, %method, %path, "remote request failed: {}", err);
                state.status_code = err.status_code();
                state.error = err.to_string();
            }
        }
        state.last_update = Some(Utc::now());

        if let Some(metrics) = &self.metrics {
            metrics.record_remote_request(&self.name, method, state.status_code, timer.elapsed());
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, Value), RemoteError> {
        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(RemoteError::from_transport)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(RemoteError::from_transport)?;

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            let body = String::from_utf8_lossy(&bytes);
            let message = if body.trim().is_empty() {
                reason.to_string()
            } else {
                format!("{} ({})", reason, body.trim())
            };
            return Err(RemoteError::Application {
                status: status.as_u16(),
                message,
            });
        }

        let body = serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok((status.as_u16(), body))
    }

    pub async fn state(&self) -> TargetState {
        self.state.lock().await.clone()
    }

    pub async fn status(&self) -> TargetStatus {
        let state = self.state.lock().await;
        TargetStatus {
            url: self.url.to_string(),
            status_code: state.status_code,
            error: state.error.clone(),
            last_update: state
                .last_update
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Current data (or metadata) subtree at `path`, `null` when absent.
    pub async fn subtree(&self, path: &str, want_metadata: bool) -> Value {
        self.view(path, want_metadata).await.subtree
    }

    /// Subtree at `path` and the last call's outcome, read under one lock.
    pub async fn view(&self, path: &str, want_metadata: bool) -> TargetView {
        let state = self.state.lock().await;
        let tree = if want_metadata { &state.metadata } else { &state.data };
        TargetView {
            subtree: merge::subtree_at(tree, path).cloned().unwrap_or(Value::Null),
            status_code: state.status_code,
            error: state.error.clone(),
        }
    }
}
