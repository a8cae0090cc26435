//! Token service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; details are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Token service error type.
///
/// - InvalidToken: 401 Unauthorized (bad, expired or missing session credential)
/// - Unauthorized: 403 Forbidden (role mismatch, issuing for someone else)
/// - InvalidSubject: 404 Not Found (subject is not a known identity)
/// - MissingChannel, InvalidChannel, BadRequest: 400 Bad Request
/// - Crypto, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum TsError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Subject not found")]
    InvalidSubject,

    #[error("Channel is required")]
    MissingChannel,

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal server error")]
    Internal,
}

impl TsError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            TsError::InvalidToken(_) => 401,
            TsError::Unauthorized(_) => 403,
            TsError::InvalidSubject => 404,
            TsError::MissingChannel | TsError::InvalidChannel(_) | TsError::BadRequest(_) => 400,
            TsError::Crypto(_) | TsError::Internal => 500,
        }
    }

    /// Short label for metrics and audit records.
    pub fn label(&self) -> &'static str {
        match self {
            TsError::InvalidToken(_) => "invalid_token",
            TsError::Unauthorized(_) => "unauthorized",
            TsError::InvalidSubject => "invalid_subject",
            TsError::MissingChannel => "missing_channel",
            TsError::InvalidChannel(_) => "invalid_channel",
            TsError::BadRequest(_) => "bad_request",
            TsError::Crypto(_) => "crypto",
            TsError::Internal => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for TsError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            TsError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            TsError::Unauthorized(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            TsError::InvalidSubject => (
                StatusCode::NOT_FOUND,
                "SUBJECT_NOT_FOUND",
                "Subject not found".to_string(),
            ),
            TsError::MissingChannel => (
                StatusCode::BAD_REQUEST,
                "CHANNEL_REQUIRED",
                "Channel is required".to_string(),
            ),
            TsError::InvalidChannel(reason) => {
                (StatusCode::BAD_REQUEST, "INVALID_CHANNEL", reason.clone())
            }
            TsError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            TsError::Crypto(err) => {
                tracing::error!(target: "ts.crypto", error = %err, "Cryptographic operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CRYPTO_ERROR",
                    "An internal cryptographic error occurred".to_string(),
                )
            }
            TsError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"callbridge\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TsError::InvalidToken("x".to_string()).status_code(), 401);
        assert_eq!(TsError::Unauthorized("x".to_string()).status_code(), 403);
        assert_eq!(TsError::InvalidSubject.status_code(), 404);
        assert_eq!(TsError::MissingChannel.status_code(), 400);
        assert_eq!(TsError::InvalidChannel("x".to_string()).status_code(), 400);
        assert_eq!(TsError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(TsError::Crypto("x".to_string()).status_code(), 500);
        assert_eq!(TsError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_invalid_token_sets_www_authenticate() {
        let response = TsError::InvalidToken("expired".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(header.contains("invalid_token"));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
        assert_eq!(body["error"]["message"], "expired");
    }

    #[tokio::test]
    async fn test_into_response_missing_channel() {
        let response = TsError::MissingChannel.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "CHANNEL_REQUIRED");
    }

    #[tokio::test]
    async fn test_into_response_crypto_hides_details() {
        let response = TsError::Crypto("pkcs8 parse failed at byte 12".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(
            body["error"]["message"],
            "An internal cryptographic error occurred"
        );
    }
}
