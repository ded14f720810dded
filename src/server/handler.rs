// src/server/handler.rs
use hyper::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::Service;
use tracing::Instrument;
use uuid::Uuid;

use crate::controller::{ComponentResponse, RoutingController};
use crate::proxy::JSON_CONTENT_TYPE;

pub const API_PREFIX: &str = "/api";

/// Serves the controller tree as JSON under `/api/<path>`.
#[derive(Clone)]
pub struct RequestHandler {
    controller: Arc<RoutingController>,
}

impl RequestHandler {
    pub fn new(controller: Arc<RoutingController>) -> Self {
        Self { controller }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            %request_id,
            method = %req.method(),
            uri = %req.uri()
        );

        let mut response = self.dispatch(req).instrument(span).await;
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }

    async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let path = match api_path(req.uri().path()) {
            Some(path) => path.to_string(),
            None => return json_response(404, json!({"error": format!("No such resource: {}", req.uri().path())})),
        };

        let method = req.method().clone();
        match method {
            Method::GET => {
                let want_metadata = wants_metadata(&req);
                let controller = self.controller.clone();
                self.run(move || {
                    if want_metadata {
                        controller.get_metadata(&path)
                    } else {
                        controller.get(&path)
                    }
                })
                .await
            }
            Method::PUT => {
                let value = match decode_body(req.into_body()).await {
                    Ok(value) => value,
                    Err(message) => {
                        tracing::warn!("{}", message);
                        return json_response(400, json!({ "error": message }));
                    }
                };
                let controller = self.controller.clone();
                self.run(move || controller.set(&path, value)).await
            }
            _ => json_response(405, json!({"error": format!("Method {} not allowed", method)})),
        }
    }

    /// Run a blocking controller call off the async workers.
    async fn run<F>(&self, call: F) -> Response<Body>
    where
        F: FnOnce() -> Result<ComponentResponse, crate::controller::RoutingError> + Send + 'static,
    {
        let span = tracing::Span::current();
        let outcome = tokio::task::spawn_blocking(move || span.in_scope(call)).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!(%e, "routing error");
                e.into_response()
            }
            Err(e) => {
                tracing::error!(%e, "controller call failed");
                ComponentResponse::error(500, format!("Controller call failed: {}", e))
            }
        };
        json_response(response.status_code, response.body)
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

/// Strip the API prefix; `None` when the request is outside it.
fn api_path(uri_path: &str) -> Option<&str> {
    let rest = uri_path.strip_prefix(API_PREFIX)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

fn wants_metadata(req: &Request<Body>) -> bool {
    req.headers()
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("metadata=true"))
}

async fn decode_body(body: Body) -> Result<Value, String> {
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| format!("Failed to decode PUT request body: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("Failed to decode PUT request body: {}", e))
}

fn json_response(status_code: u16, body: Value) -> Response<Body> {
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}
