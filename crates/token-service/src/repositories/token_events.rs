//! Audit log of token issuance.
//!
//! Every issuance attempt is recorded against its subject. Recording never
//! invalidates earlier tokens. The log is bounded; the oldest events are
//! evicted first.

use crate::models::{TokenEvent, TokenEventType};
use common::jwt::TokenScope;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Default number of events retained.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct TokenAuditLog {
    events: Mutex<VecDeque<TokenEvent>>,
    capacity: usize,
}

impl Default for TokenAuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl TokenAuditLog {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record an issuance attempt.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_event(
        &self,
        event_type: TokenEventType,
        subject: &str,
        scope: TokenScope,
        channel: Option<&str>,
        jti: Option<&str>,
        failure_reason: Option<&str>,
        created_at: i64,
    ) {
        let mut events = self.events.lock().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(TokenEvent {
            event_type,
            subject: subject.to_string(),
            scope,
            channel: channel.map(ToString::to_string),
            jti: jti.map(ToString::to_string),
            failure_reason: failure_reason.map(ToString::to_string),
            created_at,
        });
    }

    /// Events recorded for `subject`, oldest first.
    pub async fn events_for(&self, subject: &str) -> Vec<TokenEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_for_filters_by_subject() {
        let log = TokenAuditLog::default();
        log.log_event(TokenEventType::TokenIssued, "alice", TokenScope::Bus, None, Some("j1"), None, 1)
            .await;
        log.log_event(TokenEventType::TokenIssued, "bob", TokenScope::Bus, None, Some("j2"), None, 2)
            .await;

        let events = log.events_for("alice").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].jti.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = TokenAuditLog::with_capacity(2);
        for i in 0..3 {
            log.log_event(
                TokenEventType::TokenDenied,
                "alice",
                TokenScope::Media,
                None,
                None,
                Some("missing_channel"),
                i,
            )
            .await;
        }

        assert_eq!(log.len().await, 2);
        let events = log.events_for("alice").await;
        assert_eq!(events[0].created_at, 1);
        assert_eq!(events[1].created_at, 2);
    }
}
