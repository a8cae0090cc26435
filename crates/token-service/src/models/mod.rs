use common::jwt::TokenScope;
use common::types::{AccountKind, IdentityId};
use serde::{Deserialize, Serialize};

/// An account as held by account storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: IdentityId,
    pub display_name: String,
    pub kind: AccountKind,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Public projection of an account shown in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: IdentityId,
    pub display_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl From<&Account> for DirectoryEntry {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            display_name: account.display_name.clone(),
            email: account.email.clone(),
            bio: account.bio.clone(),
        }
    }
}

/// One page of directory results. Absent `next_cursor` means the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPage {
    pub entries: Vec<DirectoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<IdentityId>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Absolute expiry, Unix epoch seconds.
    pub expires_at: i64,
}

/// JSON Web Key (RFC 7517), OKP/Ed25519 only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEventType {
    TokenIssued,
    TokenDenied,
}

impl TokenEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenEventType::TokenIssued => "token_issued",
            TokenEventType::TokenDenied => "token_denied",
        }
    }
}

/// Audit record of an issuance attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TokenEvent {
    pub event_type: TokenEventType,
    pub subject: String,
    pub scope: TokenScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
}
