//! HTTP routes for the signaling service.

use crate::bus::BusActorHandle;
use crate::gateway;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: BusActorHandle,
}

/// Build the application routes.
///
/// - `/health`, `/metrics` - public
/// - `/api/v1/bus` - WebSocket upgrade; authenticated by bus token after upgrade
///
/// The request timeout covers the upgrade handshake only; upgraded sockets
/// run on their own task.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let app_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/bus", get(gateway::bus_upgrade))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    app_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
