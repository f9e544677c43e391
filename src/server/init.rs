//! Server initialization
//!
//! Contains the main `run()` function that starts all server components.

use super::background_tasks::{start_change_watcher, start_convergence, start_dispatcher};
use super::config::AppConfig;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use gantry_core::{shutdown_on_signals, Hub, MemoryStore, ShutdownController};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

async fn health() -> &'static str {
    "ok"
}

/// HTTP routes: health check plus the event stream.
pub fn app(hub: Hub, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(gantry_stream::router(hub, shutdown))
        .layer(TraceLayer::new_for_http())
}

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Gantry v{}", env!("CARGO_PKG_VERSION"));

    let shutdown_controller = ShutdownController::with_timeout(config.server.shutdown_timeout());
    tokio::spawn(shutdown_on_signals(shutdown_controller.clone()));

    let hub = Hub::from_config(&config.hub);
    let store = Arc::new(MemoryStore::new());

    let watcher_handle = start_change_watcher(&config, &store, &hub, &shutdown_controller);
    let dispatcher_handle = start_dispatcher(&config, &store, &shutdown_controller)?;
    let convergence_handle = start_convergence(&config, &store, &shutdown_controller);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    let server_shutdown = shutdown_controller.token();
    let served = axum::serve(listener, app(hub, shutdown_controller.token()))
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("HTTP server error");

    // Also reached when the server fails on its own.
    shutdown_controller.shutdown();

    info!("Waiting for background components to finish...");
    shutdown_controller.drain("change_watcher", watcher_handle).await;
    shutdown_controller.drain("dispatcher", dispatcher_handle).await;
    shutdown_controller.drain("convergence", convergence_handle).await;

    served?;
    info!(phase = %shutdown_controller.phase(), "Gantry shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_route() {
        let app = app(Hub::new(), CancellationToken::new());

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_events_route_is_event_stream() {
        let hub = Hub::new();
        let app = app(hub.clone(), CancellationToken::new());

        let response = app
            .oneshot(Request::get("/v1/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        assert_eq!(hub.subscriber_count(), 1);

        drop(response);
        assert!(!hub.has_subscribers());
    }
}
