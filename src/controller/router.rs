// src/controller/router.rs
use super::component::{AsyncComponent, Component, ComponentResponse, Destination};
use crate::config::BindingConfig;
use crate::metrics::MetricsCollector;
use crate::parameter::{ParameterTree, ParameterTreeBuilder, TreeError};
use crate::path;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const SELF_SELECTOR: &str = "self";
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Component {0} not found")]
    ComponentNotFound(String),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Component {component} did not respond within {timeout:?}")]
    Timeout { component: String, timeout: Duration },

    #[error("Call to component {0} was cancelled")]
    Cancelled(String),

    #[error("Cannot wait for component {0} from inside a current-thread runtime")]
    Bridge(String),
}

impl RoutingError {
    pub fn status_code(&self) -> u16 {
        match self {
            RoutingError::ComponentNotFound(_) | RoutingError::Tree(_) => 400,
            RoutingError::Timeout { .. } => 504,
            RoutingError::Cancelled(_) => 503,
            RoutingError::Bridge(_) => 500,
        }
    }

    pub fn into_response(self) -> ComponentResponse {
        ComponentResponse::error(self.status_code(), self.to_string())
    }
}

/// Registered components plus the machinery to call them with one blocking
/// contract. Shared with the self-tree bindings.
struct Dispatcher {
    components: HashMap<String, Destination>,
    handle: Handle,
    bridge_timeout: Duration,
    shutdown: CancellationToken,
}

impl Dispatcher {
    fn destination(&self, name: &str) -> Result<&Destination, RoutingError> {
        self.components
            .get(name)
            .ok_or_else(|| RoutingError::ComponentNotFound(name.to_string()))
    }

    fn get(&self, name: &str, path: &str, want_metadata: bool) -> Result<ComponentResponse, RoutingError> {
        match self.destination(name)? {
            Destination::Sync(component) => Ok(component.get(path, want_metadata)),
            Destination::Async(component) => self.bridge(name, component.get(path, want_metadata)),
        }
    }

    fn set(&self, name: &str, path: &str, value: Value) -> Result<ComponentResponse, RoutingError> {
        match self.destination(name)? {
            Destination::Sync(component) => Ok(component.set(path, value)),
            Destination::Async(component) => self.bridge(name, component.set(path, value)),
        }
    }

    /// Block on an asynchronous component call, bounded by the bridge timeout
    /// and the shutdown token.
    fn bridge<F>(&self, name: &str, call: F) -> Result<ComponentResponse, RoutingError>
    where
        F: Future<Output = ComponentResponse>,
    {
        let timeout = self.bridge_timeout;
        let shutdown = self.shutdown.clone();
        let guarded = async move {
            tokio::select! {
                _ = shutdown.cancelled() => Err(RoutingError::Cancelled(name.to_string())),
                result = tokio::time::timeout(timeout, call) => {
                    result.map_err(|_| RoutingError::Timeout { component: name.to_string(), timeout })
                }
            }
        };

        match Handle::try_current() {
            Err(_) => self.handle.block_on(guarded),
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.handle.block_on(guarded))
            }
            Ok(_) => Err(RoutingError::Bridge(name.to_string())),
        }
    }
}

/// Routes get/set calls by their first path segment to the controller's own
/// tree or to a registered component.
pub struct RoutingController {
    name: String,
    dispatcher: Arc<Dispatcher>,
    self_tree: ParameterTree,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RoutingController {
    pub fn builder(name: impl Into<String>, handle: Handle) -> ControllerBuilder {
        ControllerBuilder {
            name: name.into(),
            handle,
            bridge_timeout: DEFAULT_BRIDGE_TIMEOUT,
            components: HashMap::new(),
            bindings: Vec::new(),
            metrics: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component_names(&self) -> Vec<String> {
        sorted_names(&self.dispatcher.components)
    }

    pub fn get(&self, path: &str) -> Result<ComponentResponse, RoutingError> {
        self.route_get(path, false)
    }

    pub fn get_metadata(&self, path: &str) -> Result<ComponentResponse, RoutingError> {
        self.route_get(path, true)
    }

    pub fn set(&self, path: &str, value: Value) -> Result<ComponentResponse, RoutingError> {
        let (selector, remainder) = path::split_selector(path);
        debug!(%selector, %remainder, "routing set");

        let result = if is_self(selector) {
            self.self_tree
                .set(remainder, value)
                .and_then(|_| self.self_tree.snapshot(remainder))
                .map(ComponentResponse::ok)
                .map_err(RoutingError::from)
        } else {
            self.dispatcher.set(selector, remainder, value)
        };

        self.record(selector, "set", &result);
        result
    }

    /// Cancel in-flight and future waits on asynchronous components.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown.cancel();
    }

    fn route_get(&self, path: &str, want_metadata: bool) -> Result<ComponentResponse, RoutingError> {
        let (selector, remainder) = path::split_selector(path);
        debug!(%selector, %remainder, want_metadata, "routing get");

        let result = if is_self(selector) {
            self.self_tree
                .get(remainder)
                .map(ComponentResponse::ok)
                .map_err(RoutingError::from)
        } else {
            self.dispatcher.get(selector, remainder, want_metadata)
        };

        self.record(selector, "get", &result);
        result
    }

    fn record(&self, selector: &str, operation: &str, result: &Result<ComponentResponse, RoutingError>) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(response) if response.is_success() => "ok",
                Ok(_) => "component_error",
                Err(_) => "routing_error",
            };
            let selector = match result {
                _ if is_self(selector) => SELF_SELECTOR,
                Err(RoutingError::ComponentNotFound(_)) => "unknown",
                _ => selector,
            };
            metrics.record_controller_request(selector, operation, outcome);
        }
    }
}

fn is_self(selector: &str) -> bool {
    selector.is_empty() || selector == SELF_SELECTOR
}

fn sorted_names(components: &HashMap<String, Destination>) -> Vec<String> {
    let mut names: Vec<String> = components.keys().cloned().collect();
    names.sort();
    names
}

pub struct ControllerBuilder {
    name: String,
    handle: Handle,
    bridge_timeout: Duration,
    components: HashMap<String, Destination>,
    bindings: Vec<BindingConfig>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ControllerBuilder {
    pub fn component(mut self, name: impl Into<String>, destination: Destination) -> Self {
        let name = name.into();
        if is_self(&name) {
            warn!(
                "Component registered as '{}' is unreachable: the selector is reserved for the controller tree",
                name
            );
        }
        if self.components.insert(name.clone(), destination).is_some() {
            warn!("Component {} registered twice, keeping the latest", name);
        }
        self
    }

    pub fn sync_component(self, name: impl Into<String>, component: Arc<dyn Component>) -> Self {
        self.component(name, Destination::Sync(component))
    }

    pub fn async_component(self, name: impl Into<String>, component: Arc<dyn AsyncComponent>) -> Self {
        self.component(name, Destination::Async(component))
    }

    /// Expose `component/path` as a read/write leaf of the controller tree.
    pub fn binding(mut self, binding: BindingConfig) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn bridge_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_timeout = timeout;
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> RoutingController {
        let names = sorted_names(&self.components);
        let dispatcher = Arc::new(Dispatcher {
            components: self.components,
            handle: self.handle,
            bridge_timeout: self.bridge_timeout,
            shutdown: CancellationToken::new(),
        });

        let controller_name = self.name.clone();
        let mut tree = ParameterTree::builder()
            .read_only("name", move || Ok(json!(controller_name)))
            .read_only("components", move || Ok(json!(names)));

        for binding in self.bindings {
            tree = bind_leaf(tree, &dispatcher, binding);
        }

        for (name, destination) in &dispatcher.components {
            debug!("Registered {} component {}", destination.kind(), name);
        }

        RoutingController {
            name: self.name,
            dispatcher,
            self_tree: tree.build(),
            metrics: self.metrics,
        }
    }
}

fn bind_leaf(
    tree: ParameterTreeBuilder,
    dispatcher: &Arc<Dispatcher>,
    binding: BindingConfig,
) -> ParameterTreeBuilder {
    let BindingConfig { leaf, component, path } = binding;
    let reader = dispatcher.clone();
    let writer = dispatcher.clone();
    let (get_leaf, get_component, get_path) = (leaf.clone(), component.clone(), path.clone());
    let set_leaf = leaf.clone();

    tree.read_write(
        &leaf,
        move || {
            let response = reader
                .get(&get_component, &get_path, false)
                .map_err(|e| binding_error(&get_leaf, e.to_string()))?;
            if !response.is_success() {
                return Err(binding_error(&get_leaf, failure_reason(&response)));
            }
            let last = path::segments(&get_path).last().map(|s| s.to_string());
            Ok(unwrap_named(response.body, last.as_deref()))
        },
        move |value| {
            let value = unwrap_named(value, Some(&set_leaf));
            let response = writer
                .set(&component, &path, value)
                .map_err(|e| binding_error(&set_leaf, e.to_string()))?;
            if !response.is_success() {
                return Err(binding_error(&set_leaf, failure_reason(&response)));
            }
            Ok(())
        },
    )
}

fn binding_error(leaf: &str, reason: String) -> TreeError {
    TreeError::Binding {
        path: leaf.to_string(),
        reason,
    }
}

fn failure_reason(response: &ComponentResponse) -> String {
    response
        .error_message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("status {}", response.status_code))
}

/// `{"name": v}` becomes `v`; anything else is returned unchanged.
fn unwrap_named(value: Value, name: Option<&str>) -> Value {
    match (value, name) {
        (Value::Object(mut map), Some(name)) if map.len() == 1 && map.contains_key(name) => {
            map.remove(name).unwrap_or(Value::Null)
        }
        (value, _) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::runtime::Runtime;

    /// Records every call and echoes the path back.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, String, Option<Value>)>>,
        value: Mutex<Value>,
    }

    impl Component for Recorder {
        fn get(&self, path: &str, _want_metadata: bool) -> ComponentResponse {
            self.calls.lock().unwrap().push(("get".into(), path.into(), None));
            ComponentResponse::ok(json!({ "path": path, "value": *self.value.lock().unwrap() }))
        }

        fn set(&self, path: &str, value: Value) -> ComponentResponse {
            self.calls.lock().unwrap().push(("set".into(), path.into(), Some(value.clone())));
            *self.value.lock().unwrap() = value.clone();
            ComponentResponse::ok(json!({ "enable": value }))
        }
    }

    struct SlowRemote {
        delay: Duration,
    }

    #[async_trait]
    impl AsyncComponent for SlowRemote {
        async fn get(&self, path: &str, want_metadata: bool) -> ComponentResponse {
            tokio::time::sleep(self.delay).await;
            ComponentResponse::ok(json!({ "path": path, "metadata": want_metadata }))
        }

        async fn set(&self, _path: &str, value: Value) -> ComponentResponse {
            tokio::time::sleep(self.delay).await;
            ComponentResponse::new(json!({ "error": "rejected", "value": value }), 502)
        }
    }

    fn controller(runtime: &Runtime, recorder: Arc<Recorder>, delay: Duration) -> RoutingController {
        RoutingController::builder("daq", runtime.handle().clone())
            .sync_component("local", recorder)
            .async_component("remote", Arc::new(SlowRemote { delay }))
            .bridge_timeout(Duration::from_millis(200))
            .build()
    }

    #[test]
    fn test_get_dispatches_remainder_to_component() {
        let runtime = Runtime::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = controller(&runtime, recorder.clone(), Duration::ZERO);

        let response = controller.get("local/a/b/").unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["path"], json!("a/b"));
        assert_eq!(recorder.calls.lock().unwrap()[0], ("get".into(), "a/b".into(), None));
    }

    #[test]
    fn test_async_component_is_awaited() {
        let runtime = Runtime::new().unwrap();
        let controller = controller(&runtime, Arc::new(Recorder::default()), Duration::from_millis(10));

        let response = controller.get_metadata("remote/x").unwrap();
        assert_eq!(response.body, json!({"path": "x", "metadata": true}));

        let response = controller.set("remote/x", json!(1)).unwrap();
        assert_eq!(response.status_code, 502);
        assert_eq!(response.error_message(), Some("rejected"));
    }

    #[test]
    fn test_unknown_selector_is_not_found_and_touches_nothing() {
        let runtime = Runtime::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = controller(&runtime, recorder.clone(), Duration::ZERO);

        let err = controller.set("missing/enable", json!(true)).unwrap_err();
        assert!(matches!(&err, RoutingError::ComponentNotFound(name) if name == "missing"));
        assert_eq!(err.status_code(), 400);
        assert!(controller.get("missing").is_err());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_self_selector_reads_controller_tree() {
        let runtime = Runtime::new().unwrap();
        let controller = controller(&runtime, Arc::new(Recorder::default()), Duration::ZERO);

        assert_eq!(controller.get("self/name").unwrap().body, json!({"name": "daq"}));
        assert_eq!(controller.get("/").unwrap(), controller.get("self").unwrap());
        assert!(matches!(
            controller.get("/components"),
            Err(RoutingError::ComponentNotFound(name)) if name == "components"
        ));
        let root = controller.get("").unwrap();
        assert_eq!(root.body["components"], json!(["local", "remote"]));
    }

    #[test]
    fn test_self_selector_wins_over_misnamed_component() {
        let runtime = Runtime::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = RoutingController::builder("daq", runtime.handle().clone())
            .sync_component("self", recorder.clone())
            .build();

        assert_eq!(controller.get("self/name").unwrap().body, json!({"name": "daq"}));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_slow_async_component_times_out() {
        let runtime = Runtime::new().unwrap();
        let controller = controller(&runtime, Arc::new(Recorder::default()), Duration::from_secs(5));

        let err = controller.get("remote/x").unwrap_err();
        assert!(matches!(err, RoutingError::Timeout { .. }));
        assert_eq!(err.status_code(), 504);
    }

    #[test]
    fn test_shutdown_cancels_bridged_calls() {
        let runtime = Runtime::new().unwrap();
        let controller = controller(&runtime, Arc::new(Recorder::default()), Duration::from_millis(10));

        controller.shutdown();
        assert!(matches!(controller.get("remote/x"), Err(RoutingError::Cancelled(_))));
        // Synchronous components are unaffected.
        assert!(controller.get("local/x").is_ok());
    }

    #[test]
    fn test_binding_reads_and_writes_through_component() {
        let runtime = Runtime::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        *recorder.value.lock().unwrap() = json!(false);
        let controller = RoutingController::builder("daq", runtime.handle().clone())
            .sync_component("local", recorder.clone())
            .binding(BindingConfig {
                leaf: "local_enable".into(),
                component: "local".into(),
                path: "enable".into(),
            })
            .build();

        let response = controller.set("self/local_enable", json!({"local_enable": true})).unwrap();
        assert_eq!(response.status_code, 200);

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls[0], ("set".into(), "enable".into(), Some(json!(true))));
        assert_eq!(calls[1].1, "enable");
    }

    #[test]
    fn test_binding_to_missing_component_reports_tree_error() {
        let runtime = Runtime::new().unwrap();
        let controller = RoutingController::builder("daq", runtime.handle().clone())
            .binding(BindingConfig {
                leaf: "ghost".into(),
                component: "nowhere".into(),
                path: "enable".into(),
            })
            .build();

        let err = controller.set("self/ghost", json!(true)).unwrap_err();
        assert!(matches!(err, RoutingError::Tree(TreeError::Binding { .. })));
    }

    /// Accepts writes but can never be read back.
    #[derive(Default)]
    struct WriteOnly {
        writes: Mutex<Vec<Value>>,
    }

    impl Component for WriteOnly {
        fn get(&self, _path: &str, _want_metadata: bool) -> ComponentResponse {
            ComponentResponse::error(502, "peer offline")
        }

        fn set(&self, _path: &str, value: Value) -> ComponentResponse {
            self.writes.lock().unwrap().push(value);
            ComponentResponse::ok(json!({}))
        }
    }

    #[test]
    fn test_unreadable_binding_keeps_tree_and_writes_usable() {
        let runtime = Runtime::new().unwrap();
        let sink = Arc::new(WriteOnly::default());
        let controller = RoutingController::builder("daq", runtime.handle().clone())
            .sync_component("sink", sink.clone())
            .binding(BindingConfig {
                leaf: "sink_mode".into(),
                component: "sink".into(),
                path: "mode".into(),
            })
            .build();

        let root = controller.get("").unwrap();
        assert_eq!(root.body["name"], json!("daq"));
        assert!(root.body["sink_mode"]["error"].as_str().unwrap().contains("peer offline"));
        assert!(controller.get("self/sink_mode").is_err());

        let response = controller.set("", json!({"sink_mode": "run"})).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["name"], json!("daq"));
        assert_eq!(*sink.writes.lock().unwrap(), vec![json!("run")]);

        let response = controller.set("self/sink_mode", json!("idle")).unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.body["sink_mode"]["error"].is_string());
        assert_eq!(sink.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bridge_from_multi_thread_runtime() {
        let controller = RoutingController::builder("daq", Handle::current())
            .async_component("remote", Arc::new(SlowRemote { delay: Duration::from_millis(5) }))
            .build();

        let response = controller.get("remote/y").unwrap();
        assert_eq!(response.body["path"], json!("y"));
    }

    #[tokio::test]
    async fn test_bridge_refuses_current_thread_runtime() {
        let controller = RoutingController::builder("daq", Handle::current())
            .async_component("remote", Arc::new(SlowRemote { delay: Duration::ZERO }))
            .build();

        assert!(matches!(controller.get("remote/y"), Err(RoutingError::Bridge(_))));
    }

    #[test]
    fn test_unwrap_named() {
        assert_eq!(unwrap_named(json!({"enable": true}), Some("enable")), json!(true));
        assert_eq!(unwrap_named(json!({"enable": true, "x": 1}), Some("enable")), json!({"enable": true, "x": 1}));
        assert_eq!(unwrap_named(json!(3), Some("enable")), json!(3));
    }
}
