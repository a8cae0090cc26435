//! Metrics definitions for the signaling service.
//!
//! - `sig_` prefix
//! - hub metrics (`sig_bus_*`) are emitted by the bus actor itself
//!
//! # Cardinality
//!
//! - `outcome`: `connected` or a `SignalingError` code
//! - `op`: send, subscribe, unsubscribe, malformed
//! - `endpoint`: the fixed route table, anything else is `/other`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sig_http_request".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Metric: `sig_gateway_sessions_total{outcome}`
pub fn record_gateway_session(outcome: &str) {
    counter!("sig_gateway_sessions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `sig_gateway_frames_total{op}`
pub fn record_gateway_frame(op: &str) {
    counter!("sig_gateway_frames_total", "op" => op.to_string()).increment(1);
}

/// Metric: `sig_http_requests_total`, `sig_http_request_duration_seconds`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);

    histogram!("sig_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sig_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/api/v1/bus" => "/api/v1/bus",
        _ => "/other",
    }
}
