//! Message types for the bus hub.
//!
//! Requests reach the hub actor over `mpsc`; replies come back on `oneshot`.
//! Events flow from the hub to each connection on its own channel.

use crate::errors::SignalingError;
use common::envelope::CallEnvelope;
use common::types::IdentityId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};

/// What happens when an identity connects while it already has a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectPolicy {
    /// Close the earlier connection with [`ConnectionState::Superseded`].
    #[default]
    Supersede,
    /// Refuse the new connection with `AlreadyConnected`.
    Reject,
}

impl FromStr for ConnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supersede" => Ok(ConnectPolicy::Supersede),
            "reject" => Ok(ConnectPolicy::Reject),
            other => Err(format!("expected 'supersede' or 'reject', got '{other}'")),
        }
    }
}

/// Connection lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    /// Another connect for the same identity replaced this one.
    Superseded,
    /// Closed by the server; the client may reconnect.
    Disconnected,
    /// The hub shut down.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPresence {
    pub peer: IdentityId,
    pub online: bool,
}

/// Events delivered to a connection, in hub order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Message(CallEnvelope),
    Presence(PeerPresence),
    ConnectionState(ConnectionState),
}

/// Hub status for health checks and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStatus {
    /// Identities with a live connection.
    pub connections: usize,
    /// Total (subscriber, peer) presence subscriptions.
    pub subscriptions: usize,
}

/// Messages sent to the `BusActor`.
#[derive(Debug)]
pub enum BusMessage {
    Connect {
        identity: IdentityId,
        token: String,
        respond_to: oneshot::Sender<Result<Registration, SignalingError>>,
    },

    Send {
        from: IdentityId,
        connection_id: u64,
        to: IdentityId,
        envelope: CallEnvelope,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    Subscribe {
        identity: IdentityId,
        connection_id: u64,
        peers: Vec<IdentityId>,
        respond_to: oneshot::Sender<Result<Vec<PeerPresence>, SignalingError>>,
    },

    Unsubscribe {
        identity: IdentityId,
        connection_id: u64,
        peers: Vec<IdentityId>,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Explicit or Drop-driven release. `respond_to` is absent from Drop.
    Release {
        identity: IdentityId,
        connection_id: u64,
        respond_to: Option<oneshot::Sender<()>>,
    },

    ForceDisconnect {
        identity: IdentityId,
        respond_to: oneshot::Sender<bool>,
    },

    GetStatus {
        respond_to: oneshot::Sender<BusStatus>,
    },
}

/// What the hub hands back for an accepted connect.
#[derive(Debug)]
pub struct Registration {
    pub connection_id: u64,
    pub events: mpsc::Receiver<BusEvent>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_policy_from_str() {
        assert_eq!("supersede".parse::<ConnectPolicy>(), Ok(ConnectPolicy::Supersede));
        assert_eq!(" Reject ".parse::<ConnectPolicy>(), Ok(ConnectPolicy::Reject));
        assert!("both".parse::<ConnectPolicy>().is_err());
        assert_eq!(ConnectPolicy::default(), ConnectPolicy::Supersede);
    }

    #[test]
    fn test_connection_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Superseded).unwrap(),
            "\"superseded\""
        );
    }
}
