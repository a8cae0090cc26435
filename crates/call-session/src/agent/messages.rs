//! Call agent mailbox and notification types.

use crate::errors::CallError;
use crate::media::MediaEvent;
use crate::registry::CallSessionRecord;
use crate::state::CallState;
use common::types::{CallType, ChannelId, IdentityId};
use tokio::sync::oneshot;

/// Messages sent to the `CallAgent`.
///
/// UI commands carry a `respond_to`; internal messages come from the agent's
/// own timer and media tasks.
#[derive(Debug)]
pub enum AgentMessage {
    Call {
        peer: IdentityId,
        call_type: CallType,
        respond_to: oneshot::Sender<Result<ChannelId, CallError>>,
    },

    Accept {
        channel: ChannelId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    Reject {
        channel: ChannelId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Replies after media has been left.
    End {
        channel: ChannelId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    Sessions {
        respond_to: oneshot::Sender<Vec<CallSessionRecord>>,
    },

    Session {
        channel: ChannelId,
        respond_to: oneshot::Sender<Option<CallSessionRecord>>,
    },

    Shutdown {
        respond_to: oneshot::Sender<()>,
    },

    /// A ringing session's timer fired.
    InviteTimeout { channel: ChannelId, attempt: u64 },

    /// Forwarded from a session's media bridge.
    Media {
        channel: ChannelId,
        attempt: u64,
        event: MediaEvent,
    },
}

/// What the agent tells the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    IncomingCall {
        channel: ChannelId,
        from: IdentityId,
        caller_name: String,
        call_type: CallType,
    },
    StateChanged {
        channel: ChannelId,
        state: CallState,
    },
    PeerJoined {
        channel: ChannelId,
        peer: IdentityId,
    },
    PeerLeft {
        channel: ChannelId,
        peer: IdentityId,
    },
    /// The peer was on another call, or this agent turned an invite away
    /// because it was.
    Busy {
        channel: ChannelId,
        peer: IdentityId,
    },
    Error {
        channel: Option<ChannelId>,
        error: CallError,
    },
    /// Another login for this identity took over the bus connection.
    SignedOut,
}
