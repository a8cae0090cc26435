//! WebSocket frame formats.
//!
//! Client frames are tagged by `op`, server frames by `type`:
//!
//! ```json
//! {"op":"send","to":"bob","envelope":{"type":"invite",...}}
//! {"type":"send_result","to":"bob","delivered":false,"error":"PEER_UNREACHABLE"}
//! ```

use crate::bus::{BusEvent, ConnectionState, PeerPresence};
use crate::errors::SignalingError;
use common::envelope::CallEnvelope;
use common::types::IdentityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Send {
        to: IdentityId,
        envelope: CallEnvelope,
    },
    Subscribe {
        peers: Vec<IdentityId>,
    },
    Unsubscribe {
        peers: Vec<IdentityId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message {
        envelope: CallEnvelope,
    },
    Presence {
        peer: IdentityId,
        online: bool,
    },
    ConnectionState {
        state: ConnectionState,
    },
    SendResult {
        to: IdentityId,
        delivered: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Presence snapshot for a `subscribe`.
    Subscribed {
        peers: Vec<PeerPresence>,
    },
    Unsubscribed {
        peers: Vec<IdentityId>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    #[must_use]
    pub fn error(err: &SignalingError) -> Self {
        ServerFrame::Error {
            code: err.error_code().to_string(),
            message: err.client_message(),
        }
    }

    #[must_use]
    pub fn malformed(reason: &str) -> Self {
        ServerFrame::Error {
            code: "BAD_FRAME".to_string(),
            message: reason.to_string(),
        }
    }
}

impl From<BusEvent> for ServerFrame {
    fn from(event: BusEvent) -> Self {
        match event {
            BusEvent::Message(envelope) => ServerFrame::Message { envelope },
            BusEvent::Presence(PeerPresence { peer, online }) => {
                ServerFrame::Presence { peer, online }
            }
            BusEvent::ConnectionState(state) => ServerFrame::ConnectionState { state },
        }
    }
}
