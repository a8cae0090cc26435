//! Common data types shared by the token service, the bus and call agents.
//!
//! # Channel identifiers
//!
//! A [`ChannelId`] is derived from the unordered pair of two identities. The
//! encoding is `"{len(lo)}.{lo}.{hi}"` over the byte-wise sorted pair, where
//! `len` is the byte length of the lower id. The length prefix keeps the
//! mapping injective even when identity ids contain the `.` separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of an identity id in bytes.
pub const MAX_IDENTITY_ID_BYTES: usize = 128;

/// Errors from constructing domain identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identity id is empty")]
    Empty,

    #[error("identity id exceeds {MAX_IDENTITY_ID_BYTES} bytes")]
    TooLong,

    #[error("identity id contains control characters")]
    ControlCharacter,

    #[error("a channel requires two distinct identities")]
    SameIdentity,

    #[error("malformed channel id")]
    MalformedChannel,
}

/// Opaque unique identifier of an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityId(String);

impl IdentityId {
    /// Validate and wrap an identity id.
    ///
    /// # Errors
    ///
    /// Returns [`IdError`] if the id is empty, longer than
    /// [`MAX_IDENTITY_ID_BYTES`], or contains ASCII control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.len() > MAX_IDENTITY_ID_BYTES {
            return Err(IdError::TooLong);
        }
        if id.chars().any(char::is_control) {
            return Err(IdError::ControlCharacter);
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdentityId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdentityId> for String {
    fn from(id: IdentityId) -> Self {
        id.0
    }
}

impl FromStr for IdentityId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Symmetric identifier of the media/signaling channel shared by two identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Derive the channel for the unordered pair `{a, b}`.
    ///
    /// `for_pair(a, b) == for_pair(b, a)` for all distinct `a`, `b`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::SameIdentity`] if `a == b`.
    pub fn for_pair(a: &IdentityId, b: &IdentityId) -> Result<Self, IdError> {
        let (lo, hi) = match a.cmp(b) {
            std::cmp::Ordering::Less => (a, b),
            std::cmp::Ordering::Greater => (b, a),
            std::cmp::Ordering::Equal => return Err(IdError::SameIdentity),
        };
        Ok(Self(format!(
            "{}.{}.{}",
            lo.as_str().len(),
            lo.as_str(),
            hi.as_str()
        )))
    }

    /// Parse and validate an externally supplied channel id.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::MalformedChannel`] unless the string is exactly what
    /// [`ChannelId::for_pair`] would produce for its members.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let (lo, hi) = split_members(raw)?;
        let canonical = Self::for_pair(&lo, &hi).map_err(|_| IdError::MalformedChannel)?;
        if canonical.0 != raw {
            return Err(IdError::MalformedChannel);
        }
        Ok(canonical)
    }

    /// The two member identities, lower id first.
    ///
    /// # Errors
    ///
    /// Only fails for ids that bypassed [`ChannelId::parse`], which the
    /// constructors make impossible; the `Result` keeps indexing panic-free.
    pub fn members(&self) -> Result<(IdentityId, IdentityId), IdError> {
        split_members(&self.0)
    }

    /// Whether `identity` is one of the two members.
    #[must_use]
    pub fn contains(&self, identity: &IdentityId) -> bool {
        self.members()
            .map(|(lo, hi)| &lo == identity || &hi == identity)
            .unwrap_or(false)
    }

    /// The member that is not `me`, if `me` is a member.
    #[must_use]
    pub fn peer_of(&self, me: &IdentityId) -> Option<IdentityId> {
        let (lo, hi) = self.members().ok()?;
        if &lo == me {
            Some(hi)
        } else if &hi == me {
            Some(lo)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn split_members(raw: &str) -> Result<(IdentityId, IdentityId), IdError> {
    let (len_part, rest) = raw.split_once('.').ok_or(IdError::MalformedChannel)?;
    if len_part.starts_with('0') || len_part.starts_with('+') {
        return Err(IdError::MalformedChannel);
    }
    let lo_len: usize = len_part.parse().map_err(|_| IdError::MalformedChannel)?;
    let lo = rest.get(..lo_len).ok_or(IdError::MalformedChannel)?;
    let hi = rest
        .get(lo_len..)
        .and_then(|tail| tail.strip_prefix('.'))
        .ok_or(IdError::MalformedChannel)?;
    let lo = IdentityId::new(lo).map_err(|_| IdError::MalformedChannel)?;
    let hi = IdentityId::new(hi).map_err(|_| IdError::MalformedChannel)?;
    Ok((lo, hi))
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

/// Kind of call, which decides the published tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallType::Audio => "audio",
            CallType::Video => "video",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account role. Users list hosts, hosts list users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Host,
}

impl AccountKind {
    /// The role whose directory this role browses.
    #[must_use]
    pub const fn counterpart(&self) -> AccountKind {
        match self {
            AccountKind::User => AccountKind::Host,
            AccountKind::Host => AccountKind::User,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AccountKind::User => "user",
            AccountKind::Host => "host",
        }
    }
}
