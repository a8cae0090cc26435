//! A live bus connection held by one identity.
//!
//! Dropping a [`Connection`] releases it at the hub, so every exit path
//! releases. [`Connection::disconnect`] does the same but waits for the hub.

use super::messages::{BusEvent, BusMessage, PeerPresence};
use crate::errors::SignalingError;
use common::envelope::CallEnvelope;
use common::types::IdentityId;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub struct Connection {
    identity: IdentityId,
    connection_id: u64,
    events: mpsc::Receiver<BusEvent>,
    hub: mpsc::Sender<BusMessage>,
    released: bool,
}

impl Connection {
    pub(crate) fn new(
        identity: IdentityId,
        connection_id: u64,
        events: mpsc::Receiver<BusEvent>,
        hub: mpsc::Sender<BusMessage>,
    ) -> Self {
        Self {
            identity,
            connection_id,
            events,
            hub,
            released: false,
        }
    }

    /// The authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Next event, or `None` once the hub has dropped this connection.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.events.recv().await
    }

    /// Send an envelope to `to`. The hub overwrites `from_id`.
    ///
    /// # Errors
    ///
    /// - `PeerUnreachable` - `to` is not connected; the envelope is dropped
    /// - `NotConnected` - this connection was superseded or closed
    pub async fn send(&self, to: &IdentityId, envelope: CallEnvelope) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.hub
            .send(BusMessage::Send {
                from: self.identity.clone(),
                connection_id: self.connection_id,
                to: to.clone(),
                envelope,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Watch `peers`. Returns their current presence.
    pub async fn subscribe_presence(
        &self,
        peers: Vec<IdentityId>,
    ) -> Result<Vec<PeerPresence>, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.hub
            .send(BusMessage::Subscribe {
                identity: self.identity.clone(),
                connection_id: self.connection_id,
                peers,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop watching `peers`.
    pub async fn unsubscribe_presence(&self, peers: Vec<IdentityId>) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.hub
            .send(BusMessage::Unsubscribe {
                identity: self.identity.clone(),
                connection_id: self.connection_id,
                peers,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Release the connection and wait until the hub has removed it.
    pub async fn disconnect(mut self) {
        self.released = true;
        let (tx, rx) = oneshot::channel();
        let sent = self
            .hub
            .send(BusMessage::Release {
                identity: self.identity.clone(),
                connection_id: self.connection_id,
                respond_to: Some(tx),
            })
            .await;
        if sent.is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let release = BusMessage::Release {
            identity: self.identity.clone(),
            connection_id: self.connection_id,
            respond_to: None,
        };
        // Outside a runtime a full mailbox loses the release; the hub sweeps
        // connections whose event receiver has closed.
        if let Err(mpsc::error::TrySendError::Full(release)) = self.hub.try_send(release) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let hub = self.hub.clone();
                runtime.spawn(async move {
                    let _ = hub.send(release).await;
                });
            }
        }
    }
}
