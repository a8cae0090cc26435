//! Signaling service error types.
//!
//! Codes and messages are sent to WebSocket clients in `error` frames.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Bus error type.
///
/// - `AuthFailure`: `AUTH_FAILURE`
/// - `AlreadyConnected`: `ALREADY_CONNECTED`
/// - `PeerUnreachable`: `PEER_UNREACHABLE`
/// - `NotConnected`: `NOT_CONNECTED`
/// - `Internal`: `INTERNAL_ERROR`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Bus token invalid, expired, wrong scope or another subject's.
    #[error("Authentication failed")]
    AuthFailure,

    /// Identity already holds a live connection (reject policy).
    #[error("Identity already connected")]
    AlreadyConnected,

    /// Target identity has no live connection.
    #[error("Peer unreachable")]
    PeerUnreachable,

    /// This connection was superseded, disconnected or closed.
    #[error("Not connected")]
    NotConnected,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SignalingError::AuthFailure => "AUTH_FAILURE",
            SignalingError::AlreadyConnected => "ALREADY_CONNECTED",
            SignalingError::PeerUnreachable => "PEER_UNREACHABLE",
            SignalingError::NotConnected => "NOT_CONNECTED",
            SignalingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-safe message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::AuthFailure => "Invalid or expired token".to_string(),
            SignalingError::AlreadyConnected => "Already connected elsewhere".to_string(),
            SignalingError::PeerUnreachable => "Peer is offline".to_string(),
            SignalingError::NotConnected => "Connection is no longer active".to_string(),
            SignalingError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
