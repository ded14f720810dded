// src/main.rs
use anyhow::{Context, Result};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{error, info};

use daq_control_plane::{
    config,
    controller::RoutingController,
    metrics::MetricsRegistry,
    proxy::ProxyEngine,
    server::{RequestHandler, ServerBuilder},
    task::{BackgroundTask, TaskComponent},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("daq_control_plane=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    let mut builder = RoutingController::builder(config.controller.name.clone(), Handle::current())
        .bridge_timeout(config.controller.bridge_timeout())
        .metrics(metrics.clone());

    // Proxy engine, primed with one data and one metadata fan-out
    if let Some(proxy_config) = &config.proxy {
        let engine = ProxyEngine::new(proxy_config, Some(metrics.clone()))
            .context("Failed to build proxy HTTP client")?;
        engine.initialise().await;
        info!(
            "Proxy engine '{}' initialised with {} targets",
            proxy_config.name,
            engine.targets().len()
        );
        builder = builder.async_component(proxy_config.name.clone(), Arc::new(engine));
    }

    // Background tasks
    let mut tasks = Vec::new();
    for task_config in &config.tasks {
        let task = BackgroundTask::new(task_config, Handle::current(), Some(metrics.clone()));
        builder = builder.sync_component(
            task_config.name.clone(),
            Arc::new(TaskComponent::new(task.clone())),
        );
        tasks.push(task);
    }

    for binding in &config.controller.bindings {
        builder = builder.binding(binding.clone());
    }

    let controller = Arc::new(builder.build());
    info!(
        "Controller '{}' serving components {:?}",
        controller.name(),
        controller.component_names()
    );

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    let handler = RequestHandler::new(controller.clone());

    info!("Starting control plane on {}", config.server.bind_address);
    let served = ServerBuilder::new(config.server.bind_address)
        .with_handler(handler)
        .serve_with_shutdown(shutdown_signal())
        .await;

    controller.shutdown();
    for task in &tasks {
        task.shutdown();
    }
    info!("Control plane stopped");

    served
}

async fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let mut response = if req.uri().path() != path.as_str() {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    } else {
                        match registry.gather() {
                            Ok(metrics) => Response::new(Body::from(metrics)),
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        }
                    };
                    if response.status() == StatusCode::OK {
                        response.headers_mut().insert(
                            hyper::header::CONTENT_TYPE,
                            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                    }
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
