//! Call session error types.
//!
//! Every error maps to a short UI message. Only media join failures and
//! internal errors are worth retrying.

use signaling_service::errors::SignalingError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Bad, expired or wrong-scope token; the user must sign in again.
    #[error("Authentication failed")]
    AuthFailure,

    /// Role mismatch. Never retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A non-terminal session already exists for the pair.
    #[error("Already in session")]
    AlreadyInSession,

    /// The local agent is at its concurrent-session limit.
    #[error("Busy")]
    Busy,

    #[error("Peer unreachable")]
    PeerUnreachable,

    /// The media bridge refused the join twice.
    #[error("Media join failed")]
    MediaJoinFailure,

    #[error("Session not found")]
    SessionNotFound,

    /// The command is not valid in the session's current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Calling oneself, or a malformed peer id.
    #[error("Invalid peer")]
    InvalidPeer,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Text for the UI. Never includes internal details.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::AuthFailure => "please sign in again",
            CallError::Unauthorized(_) => "permission denied",
            CallError::AlreadyInSession | CallError::Busy => "busy",
            CallError::PeerUnreachable => "user offline",
            CallError::MediaJoinFailure => "could not join the call",
            CallError::SessionNotFound => "call no longer exists",
            CallError::InvalidTransition(_) => "action not available right now",
            CallError::InvalidPeer => "cannot call this user",
            CallError::Internal(_) => "something went wrong, try again",
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::MediaJoinFailure | CallError::Internal(_))
    }

    /// Label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CallError::AuthFailure => "auth_failure",
            CallError::Unauthorized(_) => "unauthorized",
            CallError::AlreadyInSession => "already_in_session",
            CallError::Busy => "busy",
            CallError::PeerUnreachable => "peer_unreachable",
            CallError::MediaJoinFailure => "media_join_failure",
            CallError::SessionNotFound => "session_not_found",
            CallError::InvalidTransition(_) => "invalid_transition",
            CallError::InvalidPeer => "invalid_peer",
            CallError::Internal(_) => "internal",
        }
    }
}

impl From<SignalingError> for CallError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::AuthFailure => CallError::AuthFailure,
            SignalingError::AlreadyConnected => {
                CallError::Unauthorized("identity is connected elsewhere".to_string())
            }
            SignalingError::PeerUnreachable | SignalingError::NotConnected => {
                CallError::PeerUnreachable
            }
            SignalingError::Internal(reason) => CallError::Internal(reason),
        }
    }
}
