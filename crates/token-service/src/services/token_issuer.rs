//! Media and bus token issuance.
//!
//! Tokens are self-issued only: the authenticated requester must be the
//! subject. A media token is bound to exactly one channel the subject is a
//! member of; a bus token is bound to none. Every attempt, granted or not, is
//! recorded in the audit log.

use crate::crypto::SigningKey;
use crate::errors::TsError;
use crate::models::TokenEventType;
use crate::observability::metrics::record_token_issued;
use crate::repositories::{AccountStore, TokenAuditLog};
use common::jwt::{AccessClaims, TokenScope};
use common::types::{ChannelId, IdentityId};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Unix epoch seconds.
    pub expires_at: i64,
    pub jti: String,
}

pub struct TokenIssuer {
    key: Arc<SigningKey>,
    accounts: Arc<dyn AccountStore>,
    audit: Arc<TokenAuditLog>,
    ttl_seconds: i64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        key: Arc<SigningKey>,
        accounts: Arc<dyn AccountStore>,
        audit: Arc<TokenAuditLog>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            key,
            accounts,
            audit,
            ttl_seconds,
        }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub fn audit_log(&self) -> &TokenAuditLog {
        &self.audit
    }

    /// Issue a token for `subject`, requested by `requester`.
    ///
    /// `channel` is the raw channel string from the request; it is required
    /// for media tokens and forbidden for bus tokens.
    ///
    /// # Errors
    ///
    /// - `InvalidSubject` - subject is not a known identity
    /// - `Unauthorized` - requester is not the subject, or not a channel member
    /// - `MissingChannel` - media token without a channel
    /// - `InvalidChannel` - malformed channel, or a channel on a bus token
    /// - `Crypto` - signing failed
    #[instrument(skip_all, name = "ts.services.token_issuer.issue", fields(scope = %scope, status))]
    pub async fn issue(
        &self,
        requester: &IdentityId,
        subject: &IdentityId,
        channel: Option<&str>,
        scope: TokenScope,
        now: i64,
    ) -> Result<IssuedToken, TsError> {
        let start = Instant::now();
        let result = self
            .issue_inner(requester, subject, channel, scope, now)
            .await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        tracing::Span::current().record("status", status);
        record_token_issued(scope.as_str(), status, start.elapsed());

        let (event_type, jti, failure_reason) = match &result {
            Ok(issued) => (TokenEventType::TokenIssued, Some(issued.jti.as_str()), None),
            Err(e) => (TokenEventType::TokenDenied, None, Some(e.label())),
        };
        self.audit
            .log_event(
                event_type,
                subject.as_str(),
                scope,
                channel,
                jti,
                failure_reason,
                now,
            )
            .await;

        result
    }

    async fn issue_inner(
        &self,
        requester: &IdentityId,
        subject: &IdentityId,
        channel: Option<&str>,
        scope: TokenScope,
        now: i64,
    ) -> Result<IssuedToken, TsError> {
        if self.accounts.get(subject).await?.is_none() {
            tracing::debug!(target: "ts.services.token_issuer", "Subject not found");
            return Err(TsError::InvalidSubject);
        }

        if requester != subject {
            tracing::warn!(
                target: "ts.services.token_issuer",
                scope = %scope,
                "Token requested for another identity"
            );
            return Err(TsError::Unauthorized(
                "Tokens may only be issued to their subject".to_string(),
            ));
        }

        let chan = match scope {
            TokenScope::Media => {
                let raw = channel.ok_or(TsError::MissingChannel)?;
                let channel_id = ChannelId::parse(raw)
                    .map_err(|e| TsError::InvalidChannel(e.to_string()))?;
                if !channel_id.contains(subject) {
                    return Err(TsError::Unauthorized(
                        "Subject is not a member of the channel".to_string(),
                    ));
                }
                Some(channel_id.as_str().to_string())
            }
            TokenScope::Bus => {
                if channel.is_some() {
                    return Err(TsError::InvalidChannel(
                        "Bus tokens are not bound to a channel".to_string(),
                    ));
                }
                None
            }
        };

        let expires_at = now + self.ttl_seconds;
        let jti = Uuid::new_v4().to_string();
        let claims = AccessClaims {
            sub: subject.as_str().to_string(),
            scope,
            chan,
            iat: now,
            exp: expires_at,
            jti: jti.clone(),
        };

        let token = self.key.sign(&claims)?;

        tracing::info!(
            target: "ts.services.token_issuer",
            scope = %scope,
            expires_at,
            "Token issued"
        );

        Ok(IssuedToken {
            token,
            expires_at,
            jti,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::repositories::InMemoryAccountStore;
    use common::jwt::{JwtValidationError, DEFAULT_CLOCK_SKEW};
    use common::types::AccountKind;

    const NOW: i64 = 1_700_000_000;

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn account(s: &str, kind: AccountKind) -> Account {
        Account {
            id: id(s),
            display_name: s.to_string(),
            kind,
            email: format!("{s}@example.com"),
            bio: None,
        }
    }

    fn issuer() -> TokenIssuer {
        let accounts = InMemoryAccountStore::with_accounts([
            account("alice", AccountKind::User),
            account("bob", AccountKind::Host),
        ]);
        TokenIssuer::new(
            Arc::new(SigningKey::generate("k1").unwrap()),
            Arc::new(accounts),
            Arc::new(TokenAuditLog::default()),
            86_400,
        )
    }

    fn channel() -> ChannelId {
        ChannelId::for_pair(&id("alice"), &id("bob")).unwrap()
    }

    #[tokio::test]
    async fn test_media_token_is_bound_to_channel() {
        let issuer = issuer();
        let ch = channel();
        let issued = issuer
            .issue(&id("alice"), &id("alice"), Some(ch.as_str()), TokenScope::Media, NOW)
            .await
            .unwrap();

        assert_eq!(issued.expires_at, NOW + 86_400);

        let verifier = issuer.key.verifier(DEFAULT_CLOCK_SKEW);
        let claims = verifier
            .verify_access(&issued.token, TokenScope::Media, &id("alice"), Some(&ch), NOW)
            .unwrap();
        assert_eq!(claims.chan.as_deref(), Some(ch.as_str()));

        let other = ChannelId::for_pair(&id("alice"), &id("carol")).unwrap();
        assert_eq!(
            verifier
                .verify_access(&issued.token, TokenScope::Media, &id("alice"), Some(&other), NOW)
                .unwrap_err(),
            JwtValidationError::ChannelMismatch
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let issuer = issuer();
        let issued = issuer
            .issue(&id("alice"), &id("alice"), None, TokenScope::Bus, NOW)
            .await
            .unwrap();

        let result = issuer.key.verifier(DEFAULT_CLOCK_SKEW).verify_access(
            &issued.token,
            TokenScope::Bus,
            &id("alice"),
            None,
            issued.expires_at,
        );
        assert_eq!(result.unwrap_err(), JwtValidationError::Expired);
    }

    #[tokio::test]
    async fn test_unknown_subject() {
        let result = issuer()
            .issue(&id("mallory"), &id("mallory"), None, TokenScope::Bus, NOW)
            .await;
        assert!(matches!(result, Err(TsError::InvalidSubject)));
    }

    #[tokio::test]
    async fn test_issuing_for_someone_else_is_unauthorized() {
        let result = issuer()
            .issue(&id("alice"), &id("bob"), None, TokenScope::Bus, NOW)
            .await;
        assert!(matches!(result, Err(TsError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_media_requires_channel() {
        let result = issuer()
            .issue(&id("alice"), &id("alice"), None, TokenScope::Media, NOW)
            .await;
        assert!(matches!(result, Err(TsError::MissingChannel)));
    }

    #[tokio::test]
    async fn test_media_rejects_foreign_or_malformed_channel() {
        let issuer = issuer();
        let foreign = ChannelId::for_pair(&id("bob"), &id("carol")).unwrap();
        let result = issuer
            .issue(&id("alice"), &id("alice"), Some(foreign.as_str()), TokenScope::Media, NOW)
            .await;
        assert!(matches!(result, Err(TsError::Unauthorized(_))));

        let result = issuer
            .issue(&id("alice"), &id("alice"), Some("alice-bob"), TokenScope::Media, NOW)
            .await;
        assert!(matches!(result, Err(TsError::InvalidChannel(_))));
    }

    #[tokio::test]
    async fn test_bus_rejects_channel() {
        let ch = channel();
        let result = issuer()
            .issue(&id("alice"), &id("alice"), Some(ch.as_str()), TokenScope::Bus, NOW)
            .await;
        assert!(matches!(result, Err(TsError::InvalidChannel(_))));
    }

    #[tokio::test]
    async fn test_each_token_has_fresh_jti_and_all_attempts_are_audited() {
        let issuer = issuer();
        let first = issuer
            .issue(&id("alice"), &id("alice"), None, TokenScope::Bus, NOW)
            .await
            .unwrap();
        let second = issuer
            .issue(&id("alice"), &id("alice"), None, TokenScope::Bus, NOW)
            .await
            .unwrap();
        assert_ne!(first.jti, second.jti);
        assert_ne!(first.token, second.token);

        let _ = issuer
            .issue(&id("alice"), &id("alice"), None, TokenScope::Media, NOW)
            .await;

        let events = issuer.audit_log().events_for("alice").await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, TokenEventType::TokenIssued);
        assert_eq!(events[0].jti.as_deref(), Some(first.jti.as_str()));
        assert_eq!(events[2].event_type, TokenEventType::TokenDenied);
        assert_eq!(events[2].failure_reason.as_deref(), Some("missing_channel"));

        // Earlier tokens stay valid after later issuance.
        let verifier = issuer.key.verifier(DEFAULT_CLOCK_SKEW);
        assert!(verifier
            .verify_access(&first.token, TokenScope::Bus, &id("alice"), None, NOW + 1)
            .is_ok());
    }
}
