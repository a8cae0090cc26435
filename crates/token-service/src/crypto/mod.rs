//! Ed25519 signing for access tokens.
//!
//! The token service holds a single [`SigningKey`]. Its public half is
//! published as a JWKS so the bus hub and media bridges can verify tokens
//! without sharing the private key.

use crate::errors::TsError;
use crate::models::JsonWebKey;
use base64::{engine::general_purpose, Engine as _};
use common::jwt::AccessTokenVerifier;
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair},
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::instrument;

/// Ed25519 signing key with its key id.
///
/// The PKCS#8 document is held in a `SecretBox` and never appears in Debug
/// output.
pub struct SigningKey {
    key_id: String,
    pkcs8: SecretBox<Vec<u8>>,
    public_key: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("pkcs8", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a fresh keypair using the system CSPRNG.
    #[instrument(skip_all)]
    pub fn generate(key_id: impl Into<String>) -> Result<Self, TsError> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| TsError::Crypto(format!("Keypair generation failed: {e}")))?;
        Self::from_pkcs8(key_id, document.as_ref().to_vec())
    }

    /// Wrap an existing PKCS#8 (v1 or v2) Ed25519 document.
    pub fn from_pkcs8(key_id: impl Into<String>, pkcs8: Vec<u8>) -> Result<Self, TsError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&pkcs8)
            .map_err(|e| TsError::Crypto(format!("Invalid private key format: {e}")))?;
        let public_key = key_pair.public_key().as_ref().to_vec();

        Ok(Self {
            key_id: key_id.into(),
            pkcs8: SecretBox::new(Box::new(pkcs8)),
            public_key,
        })
    }

    /// Decode a standard-base64 PKCS#8 document, as found in configuration.
    pub fn from_pkcs8_base64(key_id: impl Into<String>, encoded: &str) -> Result<Self, TsError> {
        let pkcs8 = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| TsError::Crypto(format!("Invalid signing key encoding: {e}")))?;
        Self::from_pkcs8(key_id, pkcs8)
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Raw 32-byte Ed25519 public key.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Public key as an RFC 7517 OKP JSON Web Key.
    #[must_use]
    pub fn public_jwk(&self) -> JsonWebKey {
        JsonWebKey {
            kid: self.key_id.clone(),
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: general_purpose::URL_SAFE_NO_PAD.encode(&self.public_key),
            use_: "sig".to_string(),
            alg: "EdDSA".to_string(),
        }
    }

    /// Verifier bound to this key and its key id.
    #[must_use]
    pub fn verifier(&self, clock_skew: Duration) -> AccessTokenVerifier {
        AccessTokenVerifier::from_public_key(&self.public_key, clock_skew)
            .with_key_id(self.key_id.clone())
    }

    /// Sign `claims` as an EdDSA JWT with `typ=JWT` and this key's `kid`.
    #[instrument(skip_all)]
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TsError> {
        let encoding_key = EncodingKey::from_ed_der(self.pkcs8.expose_secret());

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.key_id.clone());

        encode(&header, claims, &encoding_key)
            .map_err(|e| TsError::Crypto(format!("JWT signing operation failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use common::jwt::{AccessClaims, JwtValidationError, TokenScope, DEFAULT_CLOCK_SKEW};
    use common::types::IdentityId;

    /// Build PKCS#8 v1 document from Ed25519 seed.
    fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
        let mut pkcs8 = vec![
            0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22,
            0x04, 0x20,
        ];
        pkcs8.extend_from_slice(seed);
        pkcs8
    }

    fn bus_claims(now: i64) -> AccessClaims {
        AccessClaims {
            sub: "alice".to_string(),
            scope: TokenScope::Bus,
            chan: None,
            iat: now,
            exp: now + 60,
            jti: "jti".to_string(),
        }
    }

    #[test]
    fn test_generate_and_sign_round_trip() {
        let key = SigningKey::generate("k1").unwrap();
        assert_eq!(key.public_key().len(), 32);

        let now = 1_700_000_000;
        let token = key.sign(&bus_claims(now)).unwrap();
        let claims = key
            .verifier(DEFAULT_CLOCK_SKEW)
            .verify_access(
                &token,
                TokenScope::Bus,
                &IdentityId::new("alice").unwrap(),
                None,
                now + 1,
            )
            .unwrap();
        assert_eq!(claims.jti, "jti");
    }

    #[test]
    fn test_from_pkcs8_v1_seed_is_deterministic() {
        let pkcs8 = build_pkcs8_from_seed(&[42u8; 32]);
        let a = SigningKey::from_pkcs8("k1", pkcs8.clone()).unwrap();
        let b = SigningKey::from_pkcs8("k1", pkcs8).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_from_pkcs8_base64() {
        let pkcs8 = build_pkcs8_from_seed(&[1u8; 32]);
        let encoded = general_purpose::STANDARD.encode(&pkcs8);
        assert!(SigningKey::from_pkcs8_base64("k1", &encoded).is_ok());
        assert!(matches!(
            SigningKey::from_pkcs8_base64("k1", "!!!"),
            Err(TsError::Crypto(_))
        ));
        assert!(matches!(
            SigningKey::from_pkcs8("k1", vec![0u8; 10]),
            Err(TsError::Crypto(_))
        ));
    }

    #[test]
    fn test_verifier_rejects_other_key_id() {
        let key = SigningKey::generate("k1").unwrap();
        let rotated = SigningKey::from_pkcs8(
            "k2",
            build_pkcs8_from_seed(&[5u8; 32]),
        )
        .unwrap();
        let now = 1_700_000_000;
        let token = key.sign(&bus_claims(now)).unwrap();

        let result = rotated.verifier(DEFAULT_CLOCK_SKEW).verify_access(
            &token,
            TokenScope::Bus,
            &IdentityId::new("alice").unwrap(),
            None,
            now,
        );
        assert_eq!(result.unwrap_err(), JwtValidationError::UnknownKid);
    }

    #[test]
    fn test_public_jwk_shape() {
        let key = SigningKey::generate("k1").unwrap();
        let jwk = key.public_jwk();
        assert_eq!(jwk.kid, "k1");
        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.crv, "Ed25519");
        assert_eq!(
            common::jwt::decode_ed25519_public_key_jwk(&jwk.x).unwrap(),
            key.public_key()
        );
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = SigningKey::generate("k1").unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("k1"));
    }
}
