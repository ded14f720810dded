// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_name")]
    pub name: String,

    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,

    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl ControllerConfig {
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: default_controller_name(),
            bridge_timeout_ms: default_bridge_timeout_ms(),
            bindings: Vec::new(),
        }
    }
}

/// A controller-tree leaf that reads and writes `component/path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub leaf: String,
    pub component: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_name")]
    pub name: String,

    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: Url,

    /// Seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
}

impl TargetConfig {
    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
}

impl TaskConfig {
    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds)
    }
}

impl Config {
    /// Names of every component the controller will register, in config order.
    pub fn component_names(&self) -> Vec<&str> {
        self.proxy
            .iter()
            .map(|proxy| proxy.name.as_str())
            .chain(self.tasks.iter().map(|task| task.name.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.bridge_timeout_ms == 0 {
            bail!("controller.bridge_timeout_ms must be greater than zero");
        }

        if let Some(proxy) = &self.proxy {
            let mut seen = HashSet::new();
            for target in &proxy.targets {
                if target.name.is_empty() || target.name.contains('/') {
                    bail!("Invalid proxy target name '{}'", target.name);
                }
                if target.name == crate::proxy::STATUS_SELECTOR {
                    bail!("Proxy target name '{}' is reserved", target.name);
                }
                if !seen.insert(target.name.as_str()) {
                    bail!("Duplicate proxy target name '{}'", target.name);
                }
                if !is_valid_seconds(target.request_timeout) {
                    bail!("Proxy target '{}' must have a positive request_timeout", target.name);
                }
            }
        }

        for task in &self.tasks {
            if !is_valid_seconds(task.interval_seconds) {
                bail!("Task '{}' must have a positive interval_seconds", task.name);
            }
        }

        let mut components = HashSet::new();
        for name in self.component_names() {
            if name.is_empty() || name.contains('/') {
                bail!("Invalid component name '{}'", name);
            }
            if !components.insert(name) {
                bail!("Duplicate component name '{}'", name);
            }
            if name == crate::controller::SELF_SELECTOR {
                tracing::warn!(
                    "Component '{}' uses the reserved controller selector and will be unreachable",
                    name
                );
            }
        }

        for binding in &self.controller.bindings {
            if !components.contains(binding.component.as_str()) {
                bail!(
                    "Binding '{}' refers to unknown component '{}'",
                    binding.leaf,
                    binding.component
                );
            }
        }

        Ok(())
    }
}

/// Positive and representable as a `Duration`.
fn is_valid_seconds(value: f64) -> bool {
    value > 0.0 && Duration::try_from_secs_f64(value).is_ok()
}

/// Saturates instead of panicking; `validate` rejects out-of-range values.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8888))
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_controller_name() -> String {
    "controller".to_string()
}

fn default_bridge_timeout_ms() -> u64 {
    15_000
}

fn default_proxy_name() -> String {
    "proxy".to_string()
}

fn default_request_timeout() -> f64 {
    10.0
}

fn default_interval_seconds() -> f64 {
    1.0
}
