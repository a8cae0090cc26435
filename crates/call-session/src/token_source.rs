//! Where call agents get bus and media tokens.
//!
//! [`HttpTokenSource`] calls the token service with the signed-in user's
//! session credential.

use crate::errors::CallError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ChannelId, IdentityId};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, instrument, warn};

const TOKEN_REQUEST_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bus_token(&self, subject: &IdentityId) -> Result<String, CallError>;

    async fn media_token(
        &self,
        subject: &IdentityId,
        channel: &ChannelId,
    ) -> Result<String, CallError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

pub struct HttpTokenSource {
    client: Client,
    base_url: String,
    session: SecretString,
}

impl std::fmt::Debug for HttpTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenSource")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl HttpTokenSource {
    /// # Errors
    ///
    /// `Internal` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, session: SecretString) -> Result<Self, CallError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TOKEN_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "call.token_source", error = %e, "Failed to build HTTP client");
                CallError::Internal("HTTP client unavailable".to_string())
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<String, CallError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.session.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "call.token_source", error = %e, "Token request failed");
                CallError::Internal("token service unavailable".to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response.json().await.map_err(|e| {
                error!(target: "call.token_source", error = %e, "Failed to parse token response");
                CallError::Internal("malformed token response".to_string())
            })?;
            return Ok(body.token);
        }

        match status {
            // An unknown subject means the session belongs to a deleted account.
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Err(CallError::AuthFailure),
            StatusCode::FORBIDDEN => Err(CallError::Unauthorized(
                "token request denied".to_string(),
            )),
            _ => {
                warn!(target: "call.token_source", status = %status, "Unexpected token response");
                Err(CallError::Internal(format!("token service returned {status}")))
            }
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    #[instrument(skip_all, name = "call.token_source.bus")]
    async fn bus_token(&self, subject: &IdentityId) -> Result<String, CallError> {
        self.fetch("/api/v1/tokens/bus", &[("uid", subject.as_str())])
            .await
    }

    #[instrument(skip_all, name = "call.token_source.media")]
    async fn media_token(
        &self,
        subject: &IdentityId,
        channel: &ChannelId,
    ) -> Result<String, CallError> {
        self.fetch(
            "/api/v1/tokens/media",
            &[("uid", subject.as_str()), ("channel", channel.as_str())],
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    async fn source(server: &MockServer) -> HttpTokenSource {
        HttpTokenSource::new(server.uri(), SecretString::from("session-cred")).unwrap()
    }

    #[tokio::test]
    async fn test_media_token_request() {
        let server = MockServer::start().await;
        let channel = ChannelId::for_pair(&id("alice"), &id("bob")).unwrap();

        Mock::given(method("GET"))
            .and(path("/api/v1/tokens/media"))
            .and(header("authorization", "Bearer session-cred"))
            .and(query_param("uid", "alice"))
            .and(query_param("channel", channel.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "media-jwt",
                "expires_at": 1_700_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = source(&server)
            .await
            .media_token(&id("alice"), &channel)
            .await
            .unwrap();
        assert_eq!(token, "media-jwt");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        for (status, expected) in [
            (401, CallError::AuthFailure),
            (404, CallError::AuthFailure),
            (403, CallError::Unauthorized("token request denied".to_string())),
            (503, CallError::Internal("token service returned 503 Service Unavailable".to_string())),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/v1/tokens/bus"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let result = source(&server).await.bus_token(&id("alice")).await;
            assert_eq!(result, Err(expected), "status {status}");
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_internal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tokens/bus"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = source(&server).await.bus_token(&id("alice")).await;
        assert!(matches!(result, Err(CallError::Internal(_))));
    }

    #[test]
    fn test_debug_redacts_session() {
        let source =
            HttpTokenSource::new("http://localhost:8090/", SecretString::from("secret-cred"))
                .unwrap();
        let debug = format!("{source:?}");
        assert!(!debug.contains("secret-cred"));
        assert!(debug.contains("http://localhost:8090"));
    }
}
