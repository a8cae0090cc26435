//! Token and directory fixtures.
//!
//! [`TestDirectory`] owns a fresh signing key, an in-memory account store and
//! the real [`TokenIssuer`]. Agents get their tokens from it through
//! [`IssuerTokenSource`], and the bus and mock media server verify them with
//! the same key, so token paths in tests are the production ones.

use async_trait::async_trait;
use call_session::errors::CallError;
use call_session::media::MediaBridgeFactory;
use call_session::token_source::TokenSource;
use call_session::CallAgentConfig;
use common::jwt::{AccessTokenVerifier, TokenScope, DEFAULT_CLOCK_SKEW};
use common::types::{AccountKind, ChannelId, IdentityId};
use signaling_service::bus::{BusActorHandle, ConnectPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use token_service::crypto::SigningKey;
use token_service::errors::TsError;
use token_service::models::Account;
use token_service::repositories::{InMemoryAccountStore, TokenAuditLog};
use token_service::services::token_issuer::TokenIssuer;

pub const TEST_KEY_ID: &str = "call-test-key";

/// Token lifetime for fixtures. A zero TTL issues tokens that are already
/// expired.
pub const TEST_TOKEN_TTL_SECONDS: i64 = 3600;

/// Shorthand for a valid identity.
#[must_use]
pub fn test_id(id: &str) -> IdentityId {
    IdentityId::new(id).expect("valid test identity")
}

#[must_use]
pub fn test_channel(a: &str, b: &str) -> ChannelId {
    ChannelId::for_pair(&test_id(a), &test_id(b)).expect("distinct test identities")
}

#[must_use]
pub fn test_account(id: &str, kind: AccountKind) -> Account {
    Account {
        id: test_id(id),
        display_name: format!("{} Test", id.to_uppercase()),
        kind,
        email: format!("{id}@example.com"),
        bio: (kind == AccountKind::Host).then(|| format!("{id} hosts calls")),
    }
}

/// Signing key, accounts and issuer for one test.
pub struct TestDirectory {
    pub key: Arc<SigningKey>,
    pub accounts: Arc<InMemoryAccountStore>,
    pub issuer: Arc<TokenIssuer>,
}

impl TestDirectory {
    #[must_use]
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self::with_ttl(accounts, TEST_TOKEN_TTL_SECONDS)
    }

    #[must_use]
    pub fn with_ttl(accounts: impl IntoIterator<Item = Account>, ttl_seconds: i64) -> Self {
        let key = Arc::new(SigningKey::generate(TEST_KEY_ID).expect("test signing key"));
        let accounts = Arc::new(InMemoryAccountStore::with_accounts(accounts));
        let issuer = Arc::new(TokenIssuer::new(
            Arc::clone(&key),
            accounts.clone(),
            Arc::new(TokenAuditLog::default()),
            ttl_seconds,
        ));
        Self {
            key,
            accounts,
            issuer,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> AccessTokenVerifier {
        self.key.verifier(DEFAULT_CLOCK_SKEW)
    }

    /// A bus hub verifying this directory's tokens, superseding on reconnect.
    #[must_use]
    pub fn bus(&self) -> BusActorHandle {
        BusActorHandle::new(self.verifier(), ConnectPolicy::Supersede)
    }

    #[must_use]
    pub fn token_source(&self) -> Arc<IssuerTokenSource> {
        Arc::new(IssuerTokenSource::new(Arc::clone(&self.issuer)))
    }

    /// Agent config for `id` with this directory's tokens and `media`.
    #[must_use]
    pub fn agent_config(
        &self,
        id: &str,
        media: &(impl MediaBridgeFactory + Clone + 'static),
    ) -> CallAgentConfig {
        CallAgentConfig::new(
            test_id(id),
            format!("{} Test", id.to_uppercase()),
            self.token_source(),
            Arc::new(media.clone()),
        )
    }
}

/// [`TokenSource`] that calls the issuer directly, as its own subject.
pub struct IssuerTokenSource {
    issuer: Arc<TokenIssuer>,
    failing: AtomicU32,
    bus_requests: AtomicU32,
    media_requests: AtomicU32,
}

impl IssuerTokenSource {
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self {
            issuer,
            failing: AtomicU32::new(0),
            bus_requests: AtomicU32::new(0),
            media_requests: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` requests with `Internal`.
    pub fn fail_next(&self, n: u32) {
        self.failing.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn bus_requests(&self) -> u32 {
        self.bus_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn media_requests(&self) -> u32 {
        self.media_requests.load(Ordering::SeqCst)
    }

    async fn issue(
        &self,
        subject: &IdentityId,
        channel: Option<&ChannelId>,
        scope: TokenScope,
    ) -> Result<String, CallError> {
        let injected = self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CallError::Internal("injected token failure".to_string()));
        }

        let now = chrono::Utc::now().timestamp();
        self.issuer
            .issue(subject, subject, channel.map(ChannelId::as_str), scope, now)
            .await
            .map(|issued| issued.token)
            .map_err(to_call_error)
    }
}

#[async_trait]
impl TokenSource for IssuerTokenSource {
    async fn bus_token(&self, subject: &IdentityId) -> Result<String, CallError> {
        self.bus_requests.fetch_add(1, Ordering::SeqCst);
        self.issue(subject, None, TokenScope::Bus).await
    }

    async fn media_token(
        &self,
        subject: &IdentityId,
        channel: &ChannelId,
    ) -> Result<String, CallError> {
        self.media_requests.fetch_add(1, Ordering::SeqCst);
        self.issue(subject, Some(channel), TokenScope::Media).await
    }
}

/// Same mapping the HTTP token source applies to status codes.
fn to_call_error(err: TsError) -> CallError {
    match err {
        TsError::InvalidToken(_) | TsError::InvalidSubject => CallError::AuthFailure,
        TsError::Unauthorized(_) => CallError::Unauthorized("token request denied".to_string()),
        other => CallError::Internal(other.to_string()),
    }
}
