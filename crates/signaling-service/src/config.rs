//! Signaling service configuration.

use crate::bus::ConnectPolicy;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default bind address for the HTTP/WebSocket listener.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8091";

/// Default clock skew tolerance for bus tokens.
pub const DEFAULT_JWT_CLOCK_SKEW_SECONDS: i64 = 300;

/// Upper bound on the clock skew tolerance.
pub const MAX_JWT_CLOCK_SKEW_SECONDS: i64 = 600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Raw 32-byte Ed25519 public key of the token service.
    pub token_public_key: Vec<u8>,
    /// If set, tokens must carry this `kid`.
    pub token_key_id: Option<String>,
    pub connect_policy: ConnectPolicy,
    pub jwt_clock_skew_seconds: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let raw_key = vars
            .get("TOKEN_PUBLIC_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("TOKEN_PUBLIC_KEY".to_string()))?;
        let token_public_key = general_purpose::URL_SAFE_NO_PAD
            .decode(raw_key.trim().trim_end_matches('='))
            .map_err(|e| ConfigError::InvalidValue {
                name: "TOKEN_PUBLIC_KEY".to_string(),
                reason: format!("not base64url: {e}"),
            })?;
        if token_public_key.len() != 32 {
            return Err(ConfigError::InvalidValue {
                name: "TOKEN_PUBLIC_KEY".to_string(),
                reason: format!("expected 32 bytes, got {}", token_public_key.len()),
            });
        }

        let token_key_id = vars
            .get("TOKEN_KEY_ID")
            .filter(|v| !v.is_empty())
            .cloned();

        let connect_policy = match vars.get("BUS_CONNECT_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::InvalidValue {
                name: "BUS_CONNECT_POLICY".to_string(),
                reason,
            })?,
            None => ConnectPolicy::default(),
        };

        let jwt_clock_skew_seconds = match vars.get("JWT_CLOCK_SKEW_SECONDS") {
            Some(raw) => {
                let value: i64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
                    name: "JWT_CLOCK_SKEW_SECONDS".to_string(),
                    reason: format!("{e}"),
                })?;
                if !(1..=MAX_JWT_CLOCK_SKEW_SECONDS).contains(&value) {
                    return Err(ConfigError::InvalidValue {
                        name: "JWT_CLOCK_SKEW_SECONDS".to_string(),
                        reason: format!(
                            "must be between 1 and {MAX_JWT_CLOCK_SKEW_SECONDS}, got {value}"
                        ),
                    });
                }
                value
            }
            None => DEFAULT_JWT_CLOCK_SKEW_SECONDS,
        };

        Ok(Config {
            bind_address,
            token_public_key,
            token_key_id,
            connect_policy,
            jwt_clock_skew_seconds,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "TOKEN_PUBLIC_KEY".to_string(),
            general_purpose::URL_SAFE_NO_PAD.encode([7u8; 32]),
        )])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.token_public_key, vec![7u8; 32]);
        assert!(config.token_key_id.is_none());
        assert_eq!(config.connect_policy, ConnectPolicy::Supersede);
        assert_eq!(config.jwt_clock_skew_seconds, 300);
    }

    #[test]
    fn test_missing_public_key() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "TOKEN_PUBLIC_KEY"));
    }

    #[test]
    fn test_public_key_wrong_length() {
        let mut vars = base_vars();
        vars.insert(
            "TOKEN_PUBLIC_KEY".to_string(),
            general_purpose::URL_SAFE_NO_PAD.encode([1u8; 16]),
        );
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_connect_policy_parsing() {
        let mut vars = base_vars();
        vars.insert("BUS_CONNECT_POLICY".to_string(), "reject".to_string());
        assert_eq!(
            Config::from_vars(&vars).unwrap().connect_policy,
            ConnectPolicy::Reject
        );

        vars.insert("BUS_CONNECT_POLICY".to_string(), "queue".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "BUS_CONNECT_POLICY"
        ));
    }

    #[test]
    fn test_clock_skew_bounds() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "120".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().jwt_clock_skew_seconds, 120);
    }
}
