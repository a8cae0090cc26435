//! Call agent configuration.

use crate::media::MediaBridgeFactory;
use crate::token_source::TokenSource;
use common::types::IdentityId;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 1;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Configuration for one identity's call agent.
///
/// ```rust,ignore
/// let config = CallAgentConfig::new(identity, "Alice", tokens, media)
///     .with_invite_timeout(Duration::from_secs(30))
///     .with_reconnect(5, Duration::from_secs(1));
/// ```
#[derive(Clone)]
pub struct CallAgentConfig {
    pub identity: IdentityId,
    /// Sent to callees in invites.
    pub display_name: String,
    /// Opaque application credential passed to every media join.
    pub app_credential: String,
    pub token_source: Arc<dyn TokenSource>,
    pub media: Arc<dyn MediaBridgeFactory>,
    pub max_concurrent_sessions: usize,
    /// Ringing sessions time out after this long. `None` rings until answered.
    pub invite_timeout: Option<Duration>,
    pub max_reconnect_attempts: u32,
    /// Attempt `n` waits `n * reconnect_backoff` first.
    pub reconnect_backoff: Duration,
}

impl std::fmt::Debug for CallAgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallAgentConfig")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .field("max_concurrent_sessions", &self.max_concurrent_sessions)
            .field("invite_timeout", &self.invite_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .finish_non_exhaustive()
    }
}

impl CallAgentConfig {
    #[must_use]
    pub fn new(
        identity: IdentityId,
        display_name: impl Into<String>,
        token_source: Arc<dyn TokenSource>,
        media: Arc<dyn MediaBridgeFactory>,
    ) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            app_credential: String::new(),
            token_source,
            media,
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            invite_timeout: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_app_credential(mut self, app_credential: impl Into<String>) -> Self {
        self.app_credential = app_credential.into();
        self
    }

    /// Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = max.max(1);
        self
    }

    #[must_use]
    pub fn with_invite_timeout(mut self, timeout: Duration) -> Self {
        self.invite_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_backoff = backoff;
        self
    }
}
