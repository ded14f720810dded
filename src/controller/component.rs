// src/controller/component.rs
use async_trait::async_trait;
use hyper::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

/// Body and HTTP-style status returned by every destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentResponse {
    pub body: Value,
    pub status_code: u16,
}

impl ComponentResponse {
    pub fn new(body: Value, status_code: u16) -> Self {
        Self { body, status_code }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(body, StatusCode::OK.as_u16())
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(json!({ "error": message.into() }), status_code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Human readable failure message carried in the body, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

/// A destination whose operations complete synchronously.
pub trait Component: Send + Sync {
    fn get(&self, path: &str, want_metadata: bool) -> ComponentResponse;

    fn set(&self, path: &str, value: Value) -> ComponentResponse;
}

/// A destination whose operations are asynchronous. The routing controller
/// awaits them on its runtime before returning to the caller.
#[async_trait]
pub trait AsyncComponent: Send + Sync {
    async fn get(&self, path: &str, want_metadata: bool) -> ComponentResponse;

    async fn set(&self, path: &str, value: Value) -> ComponentResponse;
}

/// Tagged registry entry: the controller picks the calling convention from
/// the tag, never by inspecting the component.
#[derive(Clone)]
pub enum Destination {
    Sync(Arc<dyn Component>),
    Async(Arc<dyn AsyncComponent>),
}

impl Destination {
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Sync(_) => "sync",
            Destination::Async(_) => "async",
        }
    }
}
