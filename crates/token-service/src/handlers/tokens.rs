//! Token endpoints.
//!
//! `uid` names the token subject and defaults to the authenticated identity.

use crate::errors::TsError;
use crate::models::TokenResponse;
use crate::routes::AppState;
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use common::jwt::{SessionClaims, TokenScope};
use common::types::IdentityId;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct MediaTokenQuery {
    pub channel: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BusTokenQuery {
    pub uid: Option<String>,
    /// Accepted only so that a stray channel is rejected rather than ignored.
    pub channel: Option<String>,
}

/// GET /api/v1/tokens/media?channel=..&uid=..
#[instrument(skip_all, name = "ts.tokens.media")]
pub async fn issue_media_token(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Query(query): Query<MediaTokenQuery>,
) -> Result<Json<TokenResponse>, TsError> {
    let (requester, subject) = resolve_subject(&claims, query.uid)?;
    issue(&state, &requester, &subject, query.channel.as_deref(), TokenScope::Media).await
}

/// GET /api/v1/tokens/bus?uid=..
#[instrument(skip_all, name = "ts.tokens.bus")]
pub async fn issue_bus_token(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Query(query): Query<BusTokenQuery>,
) -> Result<Json<TokenResponse>, TsError> {
    let (requester, subject) = resolve_subject(&claims, query.uid)?;
    issue(&state, &requester, &subject, query.channel.as_deref(), TokenScope::Bus).await
}

async fn issue(
    state: &AppState,
    requester: &IdentityId,
    subject: &IdentityId,
    channel: Option<&str>,
    scope: TokenScope,
) -> Result<Json<TokenResponse>, TsError> {
    let now = chrono::Utc::now().timestamp();
    let issued = state
        .issuer
        .issue(requester, subject, channel, scope, now)
        .await?;

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

fn resolve_subject(
    claims: &SessionClaims,
    uid: Option<String>,
) -> Result<(IdentityId, IdentityId), TsError> {
    let requester = IdentityId::new(claims.sub.clone())
        .map_err(|_| TsError::InvalidToken("Invalid session subject".to_string()))?;

    let subject = match uid {
        Some(uid) => {
            IdentityId::new(uid).map_err(|e| TsError::BadRequest(format!("Invalid uid: {e}")))?
        }
        None => requester.clone(),
    };

    Ok((requester, subject))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::AccountKind;

    fn claims(sub: &str) -> SessionClaims {
        SessionClaims {
            sub: sub.to_string(),
            kind: AccountKind::User,
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_uid_defaults_to_session_subject() {
        let (requester, subject) = resolve_subject(&claims("alice"), None).unwrap();
        assert_eq!(requester, subject);
        assert_eq!(subject.as_str(), "alice");
    }

    #[test]
    fn test_explicit_uid_is_kept() {
        let (requester, subject) =
            resolve_subject(&claims("alice"), Some("bob".to_string())).unwrap();
        assert_eq!(requester.as_str(), "alice");
        assert_eq!(subject.as_str(), "bob");
    }

    #[test]
    fn test_empty_uid_is_bad_request() {
        let result = resolve_subject(&claims("alice"), Some(String::new()));
        assert!(matches!(result, Err(TsError::BadRequest(_))));
    }
}
