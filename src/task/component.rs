// src/task/component.rs
use super::background::BackgroundTask;
use crate::controller::{Component, ComponentResponse};
use crate::parameter::{ParameterTree, TreeError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Exposes a background task as `counter`, `enable` and `interval` leaves.
pub struct TaskComponent {
    task: Arc<BackgroundTask>,
    tree: ParameterTree,
}

impl TaskComponent {
    pub fn new(task: Arc<BackgroundTask>) -> Self {
        let counter = task.clone();
        let (enable_get, enable_set) = (task.clone(), task.clone());
        let (interval_get, interval_set) = (task.clone(), task.clone());

        let tree = ParameterTree::builder()
            .read_only("counter", move || Ok(json!(counter.counter())))
            .read_write(
                "enable",
                move || Ok(json!(enable_get.is_enabled())),
                move |value| {
                    let enable = value.as_bool().ok_or_else(|| TreeError::InvalidValue {
                        path: "enable".to_string(),
                        reason: format!("expected a boolean, got {}", value),
                    })?;
                    if enable {
                        enable_set.enable();
                    } else {
                        enable_set.disable();
                    }
                    Ok(())
                },
            )
            .read_write(
                "interval",
                move || Ok(json!(interval_get.interval().as_secs_f64())),
                move |value| {
                    let interval = value
                        .as_f64()
                        .filter(|s| *s > 0.0)
                        .and_then(|s| Duration::try_from_secs_f64(s).ok())
                        .ok_or_else(|| TreeError::InvalidValue {
                            path: "interval".to_string(),
                            reason: format!("expected a positive number of seconds, got {}", value),
                        })?;
                    interval_set.set_interval(interval);
                    Ok(())
                },
            )
            .build();

        Self { task, tree }
    }

    pub fn task(&self) -> &Arc<BackgroundTask> {
        &self.task
    }
}

impl Component for TaskComponent {
    fn get(&self, path: &str, _want_metadata: bool) -> ComponentResponse {
        match self.tree.get(path) {
            Ok(body) => ComponentResponse::ok(body),
            Err(e) => ComponentResponse::error(400, e.to_string()),
        }
    }

    fn set(&self, path: &str, value: Value) -> ComponentResponse {
        debug!("Task {} set {} = {}", self.task.name(), path, value);
        match self.tree.set(path, value).and_then(|_| self.tree.snapshot(path)) {
            Ok(body) => ComponentResponse::ok(body),
            Err(e) => ComponentResponse::error(400, e.to_string()),
        }
    }
}
