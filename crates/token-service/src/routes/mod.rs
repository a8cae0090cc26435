//! HTTP routes for the token service.
//!
//! Defines the Axum router and application state.

use crate::crypto::SigningKey;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_session, AuthState};
use crate::repositories::{AccountStore, TokenAuditLog};
use crate::services::{DirectoryService, TokenIssuer};
use axum::{middleware, routing::get, Router};
use common::jwt::AccessTokenVerifier;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub directory: Arc<DirectoryService>,
    pub signing_key: Arc<SigningKey>,
    /// Verifies session credentials on protected routes.
    pub verifier: AccessTokenVerifier,
}

impl AppState {
    /// Wire services around one signing key and one account store.
    #[must_use]
    pub fn new(
        signing_key: Arc<SigningKey>,
        accounts: Arc<dyn AccountStore>,
        token_ttl_seconds: i64,
        clock_skew: Duration,
    ) -> Self {
        let issuer = TokenIssuer::new(
            signing_key.clone(),
            accounts.clone(),
            Arc::new(TokenAuditLog::default()),
            token_ttl_seconds,
        );
        Self {
            issuer: Arc::new(issuer),
            directory: Arc::new(DirectoryService::new(accounts)),
            verifier: signing_key.verifier(clock_skew),
            signing_key,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/metrics`, `/.well-known/jwks.json` - public
/// - `/api/v1/tokens/{media,bus}` - session credential required
/// - `/api/v1/hosts`, `/api/v1/users` - session credential required, role checked
/// - TraceLayer, 30 second request timeout, HTTP metrics (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        verifier: state.verifier.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/.well-known/jwks.json", get(handlers::get_jwks))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/v1/tokens/media", get(handlers::issue_media_token))
        .route("/api/v1/tokens/bus", get(handlers::issue_bus_token))
        .route("/api/v1/hosts", get(handlers::list_hosts))
        .route("/api/v1/users", get(handlers::list_users))
        .route_layer(middleware::from_fn_with_state(auth_state, require_session))
        .with_state(state);

    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
