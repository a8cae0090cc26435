//! Session authentication for protected routes.
//!
//! Extracts the Bearer session credential, verifies it with the service's own
//! public key, and inserts the resulting `SessionClaims` into request
//! extensions for downstream handlers.

use crate::errors::TsError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use common::jwt::AccessTokenVerifier;
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: AccessTokenVerifier,
}

fn extract_bearer_token(req: &Request) -> Result<&str, TsError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "ts.middleware.auth", "Missing Authorization header");
            TsError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "ts.middleware.auth", "Invalid Authorization header format");
        TsError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Require a valid session credential.
///
/// Returns 401 if the credential is missing, malformed, expired or signed by
/// another key.
#[instrument(skip_all, name = "ts.middleware.auth")]
pub async fn require_session(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, TsError> {
    let token = extract_bearer_token(&req)?;

    let now = chrono::Utc::now().timestamp();
    let claims = state
        .verifier
        .verify_session(token, now)
        .map_err(|e| TsError::InvalidToken(e.to_string()))?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
