//! Token service configuration.
//!
//! Loaded from environment variables via [`Config::from_env`]; tests build it
//! from a map with [`Config::from_vars`].

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default bind address for the HTTP listener.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 86_400;

/// Shortest accepted token lifetime.
pub const MIN_TOKEN_TTL_SECONDS: i64 = 60;

/// Longest accepted token lifetime (7 days).
pub const MAX_TOKEN_TTL_SECONDS: i64 = 604_800;

/// Default key id placed in the JWT header.
pub const DEFAULT_SIGNING_KEY_ID: &str = "signing-key-01";

/// Default clock skew tolerance for session credentials.
pub const DEFAULT_JWT_CLOCK_SKEW_SECONDS: i64 = 300;

/// Upper bound on the clock skew tolerance.
pub const MAX_JWT_CLOCK_SKEW_SECONDS: i64 = 600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

pub struct Config {
    pub bind_address: String,
    pub token_ttl_seconds: i64,
    /// Base64 PKCS#8 Ed25519 key. `None` means an ephemeral key is generated.
    pub signing_key: Option<SecretString>,
    pub signing_key_id: String,
    pub jwt_clock_skew_seconds: i64,
    /// JSON file of accounts loaded into the directory at startup.
    pub directory_seed_file: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field(
                "signing_key",
                &self.signing_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("signing_key_id", &self.signing_key_id)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("directory_seed_file", &self.directory_seed_file)
            .finish()
    }
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

        let token_ttl_seconds = parse_bounded(
            vars,
            "TOKEN_TTL_SECONDS",
            DEFAULT_TOKEN_TTL_SECONDS,
            MIN_TOKEN_TTL_SECONDS,
            MAX_TOKEN_TTL_SECONDS,
        )?;

        let jwt_clock_skew_seconds = parse_bounded(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_JWT_CLOCK_SKEW_SECONDS,
            1,
            MAX_JWT_CLOCK_SKEW_SECONDS,
        )?;

        let signing_key = vars
            .get("TOKEN_SIGNING_KEY")
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.trim().to_string()));

        let signing_key_id = vars
            .get("TOKEN_SIGNING_KEY_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNING_KEY_ID.to_string());
        if signing_key_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TOKEN_SIGNING_KEY_ID".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let directory_seed_file = vars.get("DIRECTORY_SEED_FILE").cloned();

        Ok(Config {
            bind_address,
            token_ttl_seconds,
            signing_key,
            signing_key_id,
            jwt_clock_skew_seconds,
            directory_seed_file,
        })
    }
}

fn parse_bounded(
    vars: &HashMap<String, String>,
    name: &str,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: i64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    if !(min..=max).contains(&value) {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("must be between {min} and {max}, got {value}"),
        });
    }

    Ok(value)
}
