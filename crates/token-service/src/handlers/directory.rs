//! Directory endpoints.

use crate::errors::TsError;
use crate::models::DirectoryPage;
use crate::routes::AppState;
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use common::jwt::SessionClaims;
use common::types::{AccountKind, IdentityId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/v1/hosts - hosts, for users.
#[instrument(skip_all, name = "ts.directory.hosts")]
pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<DirectoryPage>, TsError> {
    list(&state, &claims, AccountKind::User, query).await
}

/// GET /api/v1/users - users, for hosts.
#[instrument(skip_all, name = "ts.directory.users")]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<DirectoryPage>, TsError> {
    list(&state, &claims, AccountKind::Host, query).await
}

async fn list(
    state: &AppState,
    claims: &SessionClaims,
    expected_consumer: AccountKind,
    query: PageQuery,
) -> Result<Json<DirectoryPage>, TsError> {
    let requester = IdentityId::new(claims.sub.clone())
        .map_err(|_| TsError::InvalidToken("Invalid session subject".to_string()))?;
    let cursor = query
        .cursor
        .map(IdentityId::new)
        .transpose()
        .map_err(|e| TsError::BadRequest(format!("Invalid cursor: {e}")))?;

    let page = state
        .directory
        .list_counterparts(
            &requester,
            claims.kind,
            expected_consumer,
            cursor.as_ref(),
            query.limit,
        )
        .await?;

    Ok(Json(page))
}
