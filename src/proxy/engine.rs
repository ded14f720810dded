// src/proxy/engine.rs
use super::error::aggregate_status;
use super::merge;
use super::target::ProxyTarget;
use crate::config::ProxyConfig;
use crate::controller::{AsyncComponent, ComponentResponse};
use crate::metrics::MetricsCollector;
use crate::path;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Reserved selector for reading per-target status without contacting peers.
pub const STATUS_SELECTOR: &str = "status";

enum Route<'a> {
    Status(&'a str),
    Single(Arc<ProxyTarget>, &'a str),
    FanOut(&'a str),
}

#[derive(Clone)]
enum Operation {
    Get { want_metadata: bool },
    Set { payload: Value },
}

/// Proxies requests to a fixed, ordered set of remote targets.
pub struct ProxyEngine {
    // Configuration order, used for fan-out.
    targets: Vec<Arc<ProxyTarget>>,
    by_name: DashMap<String, Arc<ProxyTarget>>,
}

impl ProxyEngine {
    pub fn new(config: &ProxyConfig, metrics: Option<Arc<MetricsCollector>>) -> reqwest::Result<Self> {
        let targets = config
            .targets
            .iter()
            .map(|target| ProxyTarget::new(target, metrics.clone()))
            .collect::<reqwest::Result<Vec<_>>>()?;

        if let Some(metrics) = &metrics {
            metrics.update_target_count(targets.len());
        }

        Ok(Self::from_targets(targets))
    }

    pub fn from_targets(targets: Vec<ProxyTarget>) -> Self {
        let by_name = DashMap::new();
        let targets: Vec<Arc<ProxyTarget>> = targets.into_iter().map(Arc::new).collect();

        for target in &targets {
            info!("Proxy target {} -> {}", target.name, target.url);
            by_name.insert(target.name.clone(), target.clone());
        }

        Self { targets, by_name }
    }

    pub fn targets(&self) -> &[Arc<ProxyTarget>] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<Arc<ProxyTarget>> {
        self.by_name.get(name).map(|t| t.clone())
    }

    /// Populate the data and metadata trees of every target.
    pub async fn initialise(&self) {
        self.fan_out("", Operation::Get { want_metadata: false }).await;
        self.fan_out("", Operation::Get { want_metadata: true }).await;

        let mut healthy = 0;
        for target in &self.targets {
            if target.view("", false).await.is_success() {
                healthy += 1;
            }
        }
        info!("Proxy initialised: {}/{} targets reachable", healthy, self.targets.len());
    }

    pub async fn proxy_get(&self, path: &str, want_metadata: bool) {
        match self.route(path) {
            Route::Status(_) => {}
            Route::Single(target, remainder) => target.remote_get(remainder, want_metadata).await,
            Route::FanOut(path) => self.fan_out(path, Operation::Get { want_metadata }).await,
        }
    }

    pub async fn proxy_set(&self, path: &str, payload: &Value) {
        match self.route(path) {
            Route::Status(_) => {}
            Route::Single(target, remainder) => target.remote_set(remainder, payload).await,
            Route::FanOut(path) => {
                self.fan_out(path, Operation::Set { payload: payload.clone() })
                    .await
            }
        }
    }

    /// Build the externally visible response for `path` from the targets'
    /// current state.
    pub async fn resolve_response(&self, path: &str, want_metadata: bool) -> ComponentResponse {
        match self.route(path) {
            Route::Status(remainder) => {
                let status = self.status_tree().await;
                match merge::subtree_at(&status, remainder) {
                    Some(subtree) => ComponentResponse::ok(subtree.clone()),
                    None => ComponentResponse::error(
                        400,
                        format!("Invalid path: {}", path::join(STATUS_SELECTOR, remainder)),
                    ),
                }
            }
            Route::Single(target, remainder) => {
                let view = target.view(remainder, want_metadata).await;
                if view.is_success() {
                    ComponentResponse::new(view.subtree, view.status_code)
                } else {
                    ComponentResponse::new(
                        json!({ "error": view.error, "data": view.subtree }),
                        view.status_code,
                    )
                }
            }
            Route::FanOut(path) => {
                let mut body = Map::new();
                let mut codes = Vec::with_capacity(self.targets.len());
                for target in &self.targets {
                    let view = target.view(path, want_metadata).await;
                    codes.push(view.status_code);
                    body.insert(target.name.clone(), view.subtree);
                }
                body.insert(STATUS_SELECTOR.to_string(), self.status_tree().await);
                ComponentResponse::new(Value::Object(body), aggregate_status(codes))
            }
        }
    }

    /// Status leaf of every target, keyed by name.
    pub async fn status_tree(&self) -> Value {
        let mut tree = Map::new();
        for target in &self.targets {
            let status = serde_json::to_value(target.status().await).unwrap_or(Value::Null);
            tree.insert(target.name.clone(), status);
        }
        Value::Object(tree)
    }

    fn route<'a>(&self, path: &'a str) -> Route<'a> {
        let (selector, remainder) = path::split_selector(path);
        if selector == STATUS_SELECTOR {
            return Route::Status(remainder);
        }
        match self.target(selector) {
            Some(target) => Route::Single(target, remainder),
            None => Route::FanOut(path::normalize(path)),
        }
    }

    async fn fan_out(&self, path: &str, operation: Operation) {
        debug!("Fanning out {} to {} targets", path, self.targets.len());

        let tasks: Vec<_> = self
            .targets
            .iter()
            .map(|target| {
                let target = target.clone();
                let path = path.to_string();
                let operation = operation.clone();
                tokio::spawn(async move {
                    match operation {
                        Operation::Get { want_metadata } => target.remote_get(&path, want_metadata).await,
                        Operation::Set { payload } => target.remote_set(&path, &payload).await,
                    }
                })
            })
            .collect();

        // Every target records its own outcome; only task failures surface here.
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Proxy target task join error: {}", e);
            }
        }
    }
}

#[async_trait]
impl AsyncComponent for ProxyEngine {
    async fn get(&self, path: &str, want_metadata: bool) -> ComponentResponse {
        self.proxy_get(path, want_metadata).await;
        self.resolve_response(path, want_metadata).await
    }

    async fn set(&self, path: &str, value: Value) -> ComponentResponse {
        self.proxy_set(path, &value).await;
        self.resolve_response(path, false).await
    }
}
