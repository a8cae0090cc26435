//! Call signaling envelopes exchanged over the messaging bus.
//!
//! Envelopes are serialized as JSON with the variant in a `type` field:
//!
//! ```json
//! {"type":"invite","channel_id":"5.alice.bob","call_type":"video",
//!  "from_id":"alice","caller_name":"Alice"}
//! ```

use crate::types::{CallType, ChannelId, IdentityId};
use serde::{Deserialize, Serialize};

/// Reason attached to a `rejected` envelope for a duplicate invite.
pub const REASON_ALREADY_IN_SESSION: &str = "already in session";

/// Reason attached to a `rejected` envelope when the callee is on another call.
pub const REASON_BUSY: &str = "busy";

/// Reason attached to an `ended` envelope when the caller gave up waiting.
pub const REASON_TIMEOUT: &str = "timeout";

/// Reason attached to an `ended` envelope when media could not be joined.
pub const REASON_MEDIA_FAILURE: &str = "media failure";

/// Envelope variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Invite,
    Accepted,
    Rejected,
    Ended,
}

impl EnvelopeType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Invite => "invite",
            EnvelopeType::Accepted => "accepted",
            EnvelopeType::Rejected => "rejected",
            EnvelopeType::Ended => "ended",
        }
    }
}

/// Variant-specific envelope payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    /// Caller's display name, carried by invites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,

    /// Free-form reason, carried by `rejected` and `ended`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A signaling message between the two members of a channel.
///
/// `from_id` is stamped by the bus with the authenticated sender, so a
/// receiver may trust it regardless of what the sender put there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub channel_id: ChannelId,
    pub call_type: CallType,
    pub from_id: IdentityId,
    #[serde(flatten)]
    pub payload: EnvelopePayload,
}

impl CallEnvelope {
    #[must_use]
    pub fn invite(
        from: IdentityId,
        channel_id: ChannelId,
        call_type: CallType,
        caller_name: impl Into<String>,
    ) -> Self {
        Self {
            kind: EnvelopeType::Invite,
            channel_id,
            call_type,
            from_id: from,
            payload: EnvelopePayload {
                caller_name: Some(caller_name.into()),
                reason: None,
            },
        }
    }

    #[must_use]
    pub fn accepted(from: IdentityId, channel_id: ChannelId, call_type: CallType) -> Self {
        Self {
            kind: EnvelopeType::Accepted,
            channel_id,
            call_type,
            from_id: from,
            payload: EnvelopePayload::default(),
        }
    }

    #[must_use]
    pub fn rejected(
        from: IdentityId,
        channel_id: ChannelId,
        call_type: CallType,
        reason: Option<&str>,
    ) -> Self {
        Self {
            kind: EnvelopeType::Rejected,
            channel_id,
            call_type,
            from_id: from,
            payload: EnvelopePayload {
                caller_name: None,
                reason: reason.map(ToString::to_string),
            },
        }
    }

    #[must_use]
    pub fn ended(
        from: IdentityId,
        channel_id: ChannelId,
        call_type: CallType,
        reason: Option<&str>,
    ) -> Self {
        Self {
            kind: EnvelopeType::Ended,
            channel_id,
            call_type,
            from_id: from,
            payload: EnvelopePayload {
                caller_name: None,
                reason: reason.map(ToString::to_string),
            },
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.payload.reason.as_deref()
    }
}
