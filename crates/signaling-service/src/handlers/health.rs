use crate::routes::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::Arc;

/// Liveness probe. Fails once the hub actor stops answering.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    match state.bus.status().await {
        Ok(_) if !state.bus.is_cancelled() => Ok("OK"),
        _ => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
