//! Metrics definitions for the token service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ts_` prefix for the token service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `scope`: 2 values (media, bus)
//! - `status`: 2 values (success, error) or the `TsError` label set
//! - `endpoint`: the fixed route table, anything else is `/other`
//! - `kind`: 2 values (user, host)

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called once, before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("ts_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("ts_token_issuance".to_string()),
            &[0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record a token issuance attempt.
///
/// Metric: `ts_tokens_issued_total`, `ts_token_issuance_duration_seconds`
/// Labels: `scope`, `status`
pub fn record_token_issued(scope: &str, status: &str, duration: Duration) {
    histogram!("ts_token_issuance_duration_seconds", "scope" => scope.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("ts_tokens_issued_total", "scope" => scope.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// Directory Metrics
// ============================================================================

/// Record a directory listing.
///
/// Metric: `ts_directory_requests_total`
/// Labels: `kind` (the listed kind), `status`
pub fn record_directory_request(kind: &str, status: &str) {
    counter!("ts_directory_requests_total", "kind" => kind.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `ts_http_requests_total`, `ts_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("ts_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("ts_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto the route table. Unknown paths become `/other`.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/.well-known/jwks.json" => "/.well-known/jwks.json",
        "/api/v1/tokens/media" => "/api/v1/tokens/media",
        "/api/v1/tokens/bus" => "/api/v1/tokens/bus",
        "/api/v1/hosts" => "/api/v1/hosts",
        "/api/v1/users" => "/api/v1/users",
        _ => "/other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording goes to the global no-op recorder when none is installed.

    #[test]
    fn test_record_functions_do_not_panic() {
        record_token_issued("media", "success", Duration::from_millis(2));
        record_token_issued("bus", "unauthorized", Duration::from_millis(1));
        record_directory_request("host", "success");
        record_http_request("GET", "/api/v1/hosts", 200, Duration::from_millis(5));
        record_http_request("GET", "/nope", 404, Duration::from_millis(1));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_token_counter_labels() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            record_token_issued("media", "success", Duration::from_millis(2));
            record_token_issued("media", "success", Duration::from_millis(3));
            record_token_issued("bus", "unauthorized", Duration::from_millis(1));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let media_success = snapshot
            .iter()
            .find(|(key, _, _, _)| {
                let key = key.key();
                key.name() == "ts_tokens_issued_total"
                    && key
                        .labels()
                        .any(|l| l.key() == "scope" && l.value() == "media")
            })
            .expect("media counter recorded");
        assert!(matches!(media_success.3, DebugValue::Counter(2)));

        let counters = snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == "ts_tokens_issued_total")
            .count();
        assert_eq!(counters, 2);
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/api/v1/tokens/media"), "/api/v1/tokens/media");
        assert_eq!(normalize_endpoint("/.well-known/jwks.json"), "/.well-known/jwks.json");
        assert_eq!(normalize_endpoint("/api/v1/tokens/media/extra"), "/other");
        assert_eq!(normalize_endpoint("/api/v2/hosts"), "/other");
    }
}
