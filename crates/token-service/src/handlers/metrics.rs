//! Prometheus scrape endpoint.
//!
//! Unauthenticated. Metric labels carry no subjects or tokens.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

#[tracing::instrument(skip_all, name = "ts.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
