use crate::models::Jwks;
use crate::routes::AppState;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handle JWKS request
///
/// GET /.well-known/jwks.json
///
/// Returns the signing key's public half (RFC 7517) with
/// `Cache-Control: max-age=3600`.
#[instrument(name = "ts.jwks.get", skip_all)]
pub async fn get_jwks(State(state): State<Arc<AppState>>) -> (HeaderMap, Json<Jwks>) {
    let jwks = Jwks {
        keys: vec![state.signing_key.public_jwk()],
    };

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));

    (headers, Json(jwks))
}
