//! `BusActor` - the in-process messaging bus hub.
//!
//! One actor owns every live connection, keyed by identity, and every
//! presence subscription. Connects, sends, presence changes and releases are
//! serialized through its mailbox, so:
//!
//! - an identity has at most one live connection
//! - envelopes from one sender reach a receiver in send order
//! - presence notifications follow the connect/release that caused them
//!
//! On cancellation every connection receives [`ConnectionState::Closed`].

use super::connection::Connection;
use super::messages::{
    BusEvent, BusMessage, BusStatus, ConnectPolicy, ConnectionState, PeerPresence, Registration,
};
use super::metrics::MailboxMonitor;
use crate::errors::SignalingError;
use common::envelope::CallEnvelope;
use common::jwt::{AccessTokenVerifier, TokenScope};
use common::types::IdentityId;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Hub mailbox capacity.
const BUS_CHANNEL_BUFFER: usize = 1000;

/// Per-connection event queue capacity.
const CONNECTION_EVENT_BUFFER: usize = 256;

/// How often connections whose owner vanished without a release are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the `BusActor`.
#[derive(Clone)]
pub struct BusActorHandle {
    sender: mpsc::Sender<BusMessage>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for BusActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusActorHandle")
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BusActorHandle {
    /// Spawn the hub actor and return a handle to it.
    #[must_use]
    pub fn new(verifier: AccessTokenVerifier, policy: ConnectPolicy) -> Self {
        Self::spawn(verifier, policy, CancellationToken::new())
    }

    /// Spawn the hub under `parent`; cancelling `parent` closes the hub.
    #[must_use]
    pub fn with_parent(
        verifier: AccessTokenVerifier,
        policy: ConnectPolicy,
        parent: &CancellationToken,
    ) -> Self {
        Self::spawn(verifier, policy, parent.child_token())
    }

    fn spawn(
        verifier: AccessTokenVerifier,
        policy: ConnectPolicy,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(BUS_CHANNEL_BUFFER);
        let actor = BusActor::new(receiver, cancel_token.clone(), verifier, policy);
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Authenticate `identity` with a bus token and open its connection.
    ///
    /// # Errors
    ///
    /// - `AuthFailure` - token invalid, expired, wrong scope or another subject's
    /// - `AlreadyConnected` - identity is live and the policy is `Reject`
    pub async fn connect(
        &self,
        identity: IdentityId,
        token: &str,
    ) -> Result<Connection, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BusMessage::Connect {
                identity: identity.clone(),
                token: token.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        let registration = rx
            .await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))??;

        Ok(Connection::new(
            identity,
            registration.connection_id,
            registration.events,
            self.sender.clone(),
        ))
    }

    /// Close `identity`'s live connection with `Disconnected`.
    ///
    /// Returns whether a connection was closed.
    pub async fn force_disconnect(&self, identity: IdentityId) -> Result<bool, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BusMessage::ForceDisconnect {
                identity,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn status(&self) -> Result<BusStatus, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BusMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the hub. Every connection receives `Closed`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct LiveConnection {
    connection_id: u64,
    events: mpsc::Sender<BusEvent>,
}

struct BusActor {
    receiver: mpsc::Receiver<BusMessage>,
    cancel_token: CancellationToken,
    verifier: AccessTokenVerifier,
    policy: ConnectPolicy,
    connections: HashMap<IdentityId, LiveConnection>,
    /// Watched identity -> subscribers.
    watchers: HashMap<IdentityId, HashSet<IdentityId>>,
    next_connection_id: u64,
    mailbox: MailboxMonitor,
}

impl BusActor {
    fn new(
        receiver: mpsc::Receiver<BusMessage>,
        cancel_token: CancellationToken,
        verifier: AccessTokenVerifier,
        policy: ConnectPolicy,
    ) -> Self {
        Self {
            receiver,
            cancel_token,
            verifier,
            policy,
            connections: HashMap::new(),
            watchers: HashMap::new(),
            next_connection_id: 0,
            mailbox: MailboxMonitor::new(),
        }
    }

    #[instrument(skip_all, name = "sig.actor.bus")]
    async fn run(mut self) {
        info!(target: "sig.actor.bus", policy = ?self.policy, "BusActor started");

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "sig.actor.bus", "BusActor received cancellation signal");
                    self.close_all();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(target: "sig.actor.bus", "BusActor channel closed, exiting");
                            self.close_all();
                            break;
                        }
                    }
                }

                _ = sweep.tick() => self.sweep_closed(),
            }
        }

        info!(
            target: "sig.actor.bus",
            messages_processed = self.mailbox.messages_processed(),
            events_dropped = self.mailbox.events_dropped(),
            "BusActor stopped"
        );
    }

    fn handle_message(&mut self, message: BusMessage) {
        match message {
            BusMessage::Connect {
                identity,
                token,
                respond_to,
            } => {
                let result = self.connect(identity, &token);
                let _ = respond_to.send(result);
            }

            BusMessage::Send {
                from,
                connection_id,
                to,
                envelope,
                respond_to,
            } => {
                let result = self.send(from, connection_id, &to, envelope);
                let _ = respond_to.send(result);
            }

            BusMessage::Subscribe {
                identity,
                connection_id,
                peers,
                respond_to,
            } => {
                let result = self.subscribe(&identity, connection_id, peers);
                let _ = respond_to.send(result);
            }

            BusMessage::Unsubscribe {
                identity,
                connection_id,
                peers,
                respond_to,
            } => {
                let result = self.unsubscribe(&identity, connection_id, &peers);
                let _ = respond_to.send(result);
            }

            BusMessage::Release {
                identity,
                connection_id,
                respond_to,
            } => {
                if self.is_current(&identity, connection_id) {
                    debug!(target: "sig.actor.bus", identity = %identity, "Connection released");
                    self.remove_connection(&identity);
                }
                if let Some(tx) = respond_to {
                    let _ = tx.send(());
                }
            }

            BusMessage::ForceDisconnect {
                identity,
                respond_to,
            } => {
                let closed = self.force_disconnect(&identity);
                let _ = respond_to.send(closed);
            }

            BusMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn connect(
        &mut self,
        identity: IdentityId,
        token: &str,
    ) -> Result<Registration, SignalingError> {
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = self
            .verifier
            .verify_access(token, TokenScope::Bus, &identity, None, now)
        {
            warn!(target: "sig.actor.bus", error = %e, "Bus connect rejected");
            metrics::counter!("sig_bus_connects_total", "status" => "auth_failure").increment(1);
            return Err(SignalingError::AuthFailure);
        }

        let previous_live = self
            .connections
            .get(&identity)
            .is_some_and(|existing| !existing.events.is_closed());

        if previous_live && self.policy == ConnectPolicy::Reject {
            debug!(target: "sig.actor.bus", identity = %identity, "Duplicate connect rejected");
            metrics::counter!("sig_bus_connects_total", "status" => "already_connected")
                .increment(1);
            return Err(SignalingError::AlreadyConnected);
        }

        // The new connection starts with no presence subscriptions.
        self.remove_subscriber(&identity);

        let (events_tx, events_rx) = mpsc::channel(CONNECTION_EVENT_BUFFER);
        self.next_connection_id += 1;
        let connection_id = self.next_connection_id;
        self.deliver(
            &events_tx,
            BusEvent::ConnectionState(ConnectionState::Connected),
        );

        let previous = self.connections.insert(
            identity.clone(),
            LiveConnection {
                connection_id,
                events: events_tx,
            },
        );

        match previous {
            Some(old) if previous_live => {
                info!(target: "sig.actor.bus", identity = %identity, "Connection superseded");
                self.deliver(
                    &old.events,
                    BusEvent::ConnectionState(ConnectionState::Superseded),
                );
                // Watchers lose the old connection's sessions with it.
                self.notify_presence(&identity, false);
                self.notify_presence(&identity, true);
                metrics::counter!("sig_bus_connects_total", "status" => "superseded").increment(1);
            }
            _ => {
                info!(target: "sig.actor.bus", identity = %identity, "Connection opened");
                metrics::counter!("sig_bus_connects_total", "status" => "success").increment(1);
                self.notify_presence(&identity, true);
            }
        }
        self.update_gauges();

        Ok(Registration {
            connection_id,
            events: events_rx,
        })
    }

    fn send(
        &mut self,
        from: IdentityId,
        connection_id: u64,
        to: &IdentityId,
        mut envelope: CallEnvelope,
    ) -> Result<(), SignalingError> {
        if !self.is_current(&from, connection_id) {
            metrics::counter!("sig_bus_messages_total", "status" => "not_connected").increment(1);
            return Err(SignalingError::NotConnected);
        }

        let target_closed = match self.connections.get(to) {
            Some(target) => target.events.is_closed(),
            None => {
                metrics::counter!("sig_bus_messages_total", "status" => "peer_unreachable")
                    .increment(1);
                return Err(SignalingError::PeerUnreachable);
            }
        };
        if target_closed {
            // The peer's receiver is gone but its release never arrived.
            self.remove_connection(to);
            metrics::counter!("sig_bus_messages_total", "status" => "peer_unreachable")
                .increment(1);
            return Err(SignalingError::PeerUnreachable);
        }

        envelope.from_id = from;
        let kind = envelope.kind;
        let delivered = self
            .connections
            .get(to)
            .is_some_and(|target| self.deliver(&target.events, BusEvent::Message(envelope)));

        if delivered {
            debug!(target: "sig.actor.bus", kind = kind.as_str(), "Envelope delivered");
            metrics::counter!("sig_bus_messages_total", "status" => "delivered").increment(1);
            Ok(())
        } else {
            metrics::counter!("sig_bus_messages_total", "status" => "dropped").increment(1);
            Err(SignalingError::PeerUnreachable)
        }
    }

    fn subscribe(
        &mut self,
        identity: &IdentityId,
        connection_id: u64,
        peers: Vec<IdentityId>,
    ) -> Result<Vec<PeerPresence>, SignalingError> {
        if !self.is_current(identity, connection_id) {
            return Err(SignalingError::NotConnected);
        }

        let snapshot = peers
            .into_iter()
            .map(|peer| {
                self.watchers
                    .entry(peer.clone())
                    .or_default()
                    .insert(identity.clone());
                let online = self.is_online(&peer);
                PeerPresence { peer, online }
            })
            .collect();
        self.update_gauges();
        Ok(snapshot)
    }

    fn unsubscribe(
        &mut self,
        identity: &IdentityId,
        connection_id: u64,
        peers: &[IdentityId],
    ) -> Result<(), SignalingError> {
        if !self.is_current(identity, connection_id) {
            return Err(SignalingError::NotConnected);
        }

        for peer in peers {
            if let Some(subscribers) = self.watchers.get_mut(peer) {
                subscribers.remove(identity);
                if subscribers.is_empty() {
                    self.watchers.remove(peer);
                }
            }
        }
        self.update_gauges();
        Ok(())
    }

    fn force_disconnect(&mut self, identity: &IdentityId) -> bool {
        let Some(existing) = self.connections.get(identity) else {
            return false;
        };
        self.deliver(
            &existing.events,
            BusEvent::ConnectionState(ConnectionState::Disconnected),
        );
        info!(target: "sig.actor.bus", identity = %identity, "Connection force-disconnected");
        self.remove_connection(identity);
        true
    }

    fn status(&self) -> BusStatus {
        BusStatus {
            connections: self.connections.len(),
            subscriptions: self.subscription_count(),
        }
    }

    fn close_all(&mut self) {
        for connection in self.connections.values() {
            self.deliver(
                &connection.events,
                BusEvent::ConnectionState(ConnectionState::Closed),
            );
        }
        self.connections.clear();
        self.watchers.clear();
        self.update_gauges();
    }

    fn is_current(&self, identity: &IdentityId, connection_id: u64) -> bool {
        self.connections
            .get(identity)
            .is_some_and(|c| c.connection_id == connection_id)
    }

    fn is_online(&self, identity: &IdentityId) -> bool {
        self.connections
            .get(identity)
            .is_some_and(|c| !c.events.is_closed())
    }

    fn remove_connection(&mut self, identity: &IdentityId) {
        if self.connections.remove(identity).is_some() {
            self.remove_subscriber(identity);
            self.notify_presence(identity, false);
            self.update_gauges();
        }
    }

    /// Drop connections whose event receiver closed without a release.
    fn sweep_closed(&mut self) {
        let closed: Vec<IdentityId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.events.is_closed())
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in closed {
            debug!(target: "sig.actor.bus", identity = %identity, "Closed connection swept");
            self.remove_connection(&identity);
        }
    }

    fn remove_subscriber(&mut self, identity: &IdentityId) {
        self.watchers.retain(|_, subscribers| {
            subscribers.remove(identity);
            !subscribers.is_empty()
        });
    }

    fn notify_presence(&self, peer: &IdentityId, online: bool) {
        let Some(subscribers) = self.watchers.get(peer) else {
            return;
        };
        for subscriber in subscribers {
            if let Some(connection) = self.connections.get(subscriber) {
                self.deliver(
                    &connection.events,
                    BusEvent::Presence(PeerPresence {
                        peer: peer.clone(),
                        online,
                    }),
                );
            }
        }
    }

    /// Queue an event without blocking the hub. Returns whether it was queued.
    fn deliver(&self, events: &mpsc::Sender<BusEvent>, event: BusEvent) -> bool {
        match events.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.mailbox.record_event_drop();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn subscription_count(&self) -> usize {
        self.watchers.values().map(HashSet::len).sum()
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauges(&self) {
        metrics::gauge!("sig_bus_connections").set(self.connections.len() as f64);
        metrics::gauge!("sig_bus_subscriptions").set(self.subscription_count() as f64);
    }
}
