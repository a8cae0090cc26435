//! JWT utilities shared by the token service, the bus hub and media bridges.
//!
//! This module provides:
//! - Size limits checked before any parsing
//! - Clock skew constants and `iat` validation
//! - Key ID extraction from JWT headers
//! - Access token claims (`media` / `bus` scope) and session claims
//! - [`AccessTokenVerifier`], the Ed25519 verifier every token consumer uses
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only EdDSA (Ed25519) algorithm is accepted
//! - Expiry is checked against an explicit `now` so consumers share one clock
//! - Error messages are generic; details are logged at debug level
//! - The `sub` field of every claims type is redacted in Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{AccessTokenVerifier, TokenScope};
//!
//! let verifier = AccessTokenVerifier::from_public_key(&public_key, DEFAULT_CLOCK_SKEW);
//! let claims = verifier.verify_access(token, TokenScope::Bus, &identity, None, now)?;
//! ```

use crate::types::{AccountKind, ChannelId, IdentityId};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations. Typical access tokens here are ~300 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
///
/// Tokens with `iat` (issued-at) timestamps more than this amount in the
/// future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Every variant renders the same message so that callers cannot learn which
/// check failed. The variant itself is available to server-side code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token `kid` does not name the configured key.
    #[error("The access token is invalid or expired")]
    UnknownKid,

    /// Signature did not verify against the configured key.
    #[error("The access token is invalid or expired")]
    InvalidSignature,

    /// Token `exp` is at or before `now`.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// Token scope differs from the one the consumer requires.
    #[error("The access token is invalid or expired")]
    ScopeMismatch,

    /// Token subject differs from the presenting identity.
    #[error("The access token is invalid or expired")]
    SubjectMismatch,

    /// Token channel differs from the channel being joined.
    #[error("The access token is invalid or expired")]
    ChannelMismatch,
}

// =============================================================================
// Claims Types
// =============================================================================

/// What an access token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// Join one media channel.
    Media,
    /// Authenticate on the messaging bus.
    Bus,
}

impl TokenScope {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Media => "media",
            TokenScope::Bus => "bus",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a media or bus access token.
///
/// - `sub`: subject identity (redacted in Debug output)
/// - `scope`: [`TokenScope`]
/// - `chan`: channel for media tokens, absent for bus tokens
/// - `iat` / `exp`: Unix epoch seconds
/// - `jti`: unique token id; no two tokens share one
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub scope: TokenScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl fmt::Debug for AccessClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClaims")
            .field("sub", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("chan", &self.chan)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("jti", &self.jti)
            .finish()
    }
}

/// Claims of the session credential presented to the token service.
///
/// Minted by the login service (outside this workspace) after password
/// verification. `kind` decides which directory the holder may browse.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub kind: AccountKind,
    pub iat: i64,
    pub exp: i64,
}

impl fmt::Debug for SessionClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClaims")
            .field("sub", &"[REDACTED]")
            .field("kind", &self.kind)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// Ed25519 verifier for access and session tokens.
///
/// Holds the issuer's raw 32-byte public key. Clone is cheap enough to hand
/// one to each consumer.
#[derive(Clone)]
pub struct AccessTokenVerifier {
    decoding_key: DecodingKey,
    key_id: Option<String>,
    clock_skew: Duration,
}

impl fmt::Debug for AccessTokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenVerifier")
            .field("key_id", &self.key_id)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl AccessTokenVerifier {
    /// Build a verifier from raw Ed25519 public key bytes.
    ///
    /// `clock_skew` is clamped to [`MAX_CLOCK_SKEW`].
    #[must_use]
    pub fn from_public_key(public_key: &[u8], clock_skew: Duration) -> Self {
        Self {
            decoding_key: DecodingKey::from_ed_der(public_key),
            key_id: None,
            clock_skew: clock_skew.min(MAX_CLOCK_SKEW),
        }
    }

    /// Require the token header `kid` to equal `key_id`.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Verify an access token for a specific use.
    ///
    /// Checks, in order: size, `kid`, signature, `exp`, `iat`, scope,
    /// subject, and (for media) channel.
    ///
    /// # Errors
    ///
    /// Returns the [`JwtValidationError`] for the first failed check.
    pub fn verify_access(
        &self,
        token: &str,
        scope: TokenScope,
        subject: &IdentityId,
        channel: Option<&ChannelId>,
        now: i64,
    ) -> Result<AccessClaims, JwtValidationError> {
        let claims: AccessClaims = self.decode_verified(token)?;
        validate_exp_at(claims.exp, now)?;
        validate_iat_at(claims.iat, self.clock_skew, now)?;

        if claims.scope != scope {
            tracing::debug!(
                target: "common.jwt",
                expected = %scope,
                actual = %claims.scope,
                "Token rejected: scope mismatch"
            );
            return Err(JwtValidationError::ScopeMismatch);
        }

        if claims.sub != subject.as_str() {
            tracing::debug!(target: "common.jwt", "Token rejected: subject mismatch");
            return Err(JwtValidationError::SubjectMismatch);
        }

        if claims.chan.as_deref() != channel.map(ChannelId::as_str) {
            tracing::debug!(target: "common.jwt", "Token rejected: channel mismatch");
            return Err(JwtValidationError::ChannelMismatch);
        }

        Ok(claims)
    }

    /// Verify a session credential.
    ///
    /// # Errors
    ///
    /// Returns the [`JwtValidationError`] for the first failed check.
    pub fn verify_session(
        &self,
        token: &str,
        now: i64,
    ) -> Result<SessionClaims, JwtValidationError> {
        let claims: SessionClaims = self.decode_verified(token)?;
        validate_exp_at(claims.exp, now)?;
        validate_iat_at(claims.iat, self.clock_skew, now)?;
        Ok(claims)
    }

    fn decode_verified<T: DeserializeOwned>(&self, token: &str) -> Result<T, JwtValidationError> {
        // extract_kid performs the size check before any parsing
        let kid = extract_kid(token)?;
        if let Some(expected) = &self.key_id {
            if &kid != expected {
                tracing::debug!(target: "common.jwt", "Token rejected: unknown kid");
                return Err(JwtValidationError::UnknownKid);
            }
        }

        let mut validation = Validation::new(Algorithm::EdDSA);
        // exp is checked against the caller's clock in validate_exp_at
        validation.validate_exp = false;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(target: "common.jwt", error = %e, "Token verification failed");
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        JwtValidationError::InvalidSignature
                    }
                    _ => JwtValidationError::MalformedToken,
                }
            })
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Extract the `kid` (key ID) from a JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - This function does NOT validate the token signature
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Token format invalid (wrong structure, bad base64, invalid JSON)
/// - `MissingKid` - Token header missing `kid` field or `kid` is not a string
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance against `now`.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds)
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.min(MAX_CLOCK_SKEW).as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Validate the `exp` claim against `now`. A token is dead at `exp`.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` if `exp <= now`.
pub fn validate_exp_at(exp: i64, now: i64) -> Result<(), JwtValidationError> {
    if exp <= now {
        tracing::debug!(target: "common.jwt", exp = exp, now = now, "Token rejected: expired");
        return Err(JwtValidationError::Expired);
    }
    Ok(())
}

/// Decode an Ed25519 public key from JWK `x` field (base64url format).
///
/// # Errors
///
/// Returns `base64::DecodeError` if the base64url content cannot be decoded.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url.trim())
}

// =============================================================================
// Tests
// =============================================================================
