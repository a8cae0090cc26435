//! `CallAgent` - one actor per signed-in identity.
//!
//! The agent owns the identity's bus [`Connection`], its [`SessionRegistry`]
//! and the media session of every active call. UI commands, bus events,
//! media events and invite timers all arrive through one `select!` loop and
//! are handled one at a time, so two transitions for the same session never
//! interleave. Work that suspends (token fetches, media joins, reconnects)
//! holds the loop; later inbox items wait in the mailbox and are handled in
//! order afterwards.
//!
//! # Release
//!
//! A session reaching a terminal state is released before the state change
//! is announced: its timer is cancelled, every local track is closed, media
//! event forwarding stops and the bridge is left. Shutdown ends every
//! session and then releases the bus connection.

pub mod config;
pub mod messages;

pub use config::CallAgentConfig;
pub use messages::{AgentMessage, Notification};

use crate::errors::CallError;
use crate::media::{LocalTracks, MediaBridge, MediaEvent};
use crate::observability::metrics::{
    record_invite_declined, record_media_join, record_reconnect, record_session_outcome,
};
use crate::registry::{CallSessionRecord, SessionRegistry};
use crate::state::{CallEvent, CallState};
use common::envelope::{
    CallEnvelope, EnvelopeType, REASON_ALREADY_IN_SESSION, REASON_BUSY, REASON_MEDIA_FAILURE,
    REASON_TIMEOUT,
};
use common::types::{CallType, ChannelId, IdentityId};
use signaling_service::bus::{BusActorHandle, BusEvent, Connection, ConnectionState, PeerPresence};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Agent mailbox capacity.
const AGENT_CHANNEL_BUFFER: usize = 256;

/// Notification channel capacity. Slow UI subscribers lag, not block.
const NOTIFICATION_BUFFER: usize = 128;

/// A media join is tried once more with a fresh token.
const MEDIA_JOIN_ATTEMPTS: u32 = 2;

/// Handle to a `CallAgent`.
#[derive(Clone)]
pub struct CallAgentHandle {
    identity: IdentityId,
    sender: mpsc::Sender<AgentMessage>,
    notifications: broadcast::Sender<Notification>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for CallAgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallAgentHandle")
            .field("identity", &self.identity)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CallAgentHandle {
    /// Connect `config.identity` to the bus and spawn its agent.
    ///
    /// # Errors
    ///
    /// The bus token could not be fetched (after one retry) or the bus
    /// refused the connection.
    pub async fn start(config: CallAgentConfig, bus: BusActorHandle) -> Result<Self, CallError> {
        Self::spawn(config, bus, CancellationToken::new()).await
    }

    /// Like [`CallAgentHandle::start`], cancelled along with `parent`.
    pub async fn start_with_parent(
        config: CallAgentConfig,
        bus: BusActorHandle,
        parent: &CancellationToken,
    ) -> Result<Self, CallError> {
        Self::spawn(config, bus, parent.child_token()).await
    }

    async fn spawn(
        config: CallAgentConfig,
        bus: BusActorHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, CallError> {
        let connection = open_connection(&config, &bus).await?;

        let (sender, receiver) = mpsc::channel(AGENT_CHANNEL_BUFFER);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let identity = config.identity.clone();

        let agent = CallAgent {
            config,
            bus,
            connection: Some(connection),
            receiver,
            self_sender: sender.downgrade(),
            notifications: notifications.clone(),
            cancel_token: cancel_token.clone(),
            registry: SessionRegistry::new(),
            runtimes: HashMap::new(),
            next_attempt: 0,
            signed_out: false,
        };
        tokio::spawn(agent.run());

        Ok(Self {
            identity,
            sender,
            notifications,
            cancel_token,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Receive notifications from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Invite `peer`. Returns once the invite is delivered.
    ///
    /// # Errors
    ///
    /// - `PeerUnreachable` - peer offline; no session is left behind
    /// - `AlreadyInSession` - a session with `peer` exists
    /// - `Busy` - this agent is at its concurrent-session limit
    /// - `InvalidPeer` - `peer` is this identity
    pub async fn call(&self, peer: IdentityId, call_type: CallType) -> Result<ChannelId, CallError> {
        self.request(|respond_to| AgentMessage::Call {
            peer,
            call_type,
            respond_to,
        })
        .await?
    }

    /// Accept a ringing invite and join media.
    pub async fn accept(&self, channel: ChannelId) -> Result<(), CallError> {
        self.request(|respond_to| AgentMessage::Accept {
            channel,
            respond_to,
        })
        .await?
    }

    pub async fn reject(&self, channel: ChannelId) -> Result<(), CallError> {
        self.request(|respond_to| AgentMessage::Reject {
            channel,
            respond_to,
        })
        .await?
    }

    /// End or cancel a session. Returns after media has been left.
    pub async fn end(&self, channel: ChannelId) -> Result<(), CallError> {
        self.request(|respond_to| AgentMessage::End {
            channel,
            respond_to,
        })
        .await?
    }

    pub async fn sessions(&self) -> Result<Vec<CallSessionRecord>, CallError> {
        self.request(|respond_to| AgentMessage::Sessions { respond_to })
            .await
    }

    pub async fn session(&self, channel: ChannelId) -> Result<Option<CallSessionRecord>, CallError> {
        self.request(|respond_to| AgentMessage::Session {
            channel,
            respond_to,
        })
        .await
    }

    /// End every session, leave media and release the bus connection.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|respond_to| AgentMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the agent; it releases everything on its way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> AgentMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }
}

/// Per-session resources owned by the agent.
struct SessionRuntime {
    /// Distinguishes this session from earlier ones on the same channel, so
    /// late timer and media messages are ignored.
    attempt: u64,
    timer: Option<CancellationToken>,
    media: Option<ActiveMedia>,
}

struct ActiveMedia {
    bridge: Arc<dyn MediaBridge>,
    tracks: LocalTracks,
    call_type: CallType,
    events_cancel: CancellationToken,
}

impl ActiveMedia {
    async fn teardown(self) {
        self.events_cancel.cancel();
        for track in &self.tracks.tracks {
            self.bridge.close_track(track).await;
        }
        self.bridge.leave().await;
    }
}

struct CallAgent {
    config: CallAgentConfig,
    bus: BusActorHandle,
    /// `None` while reconnecting or after sign-out.
    connection: Option<Connection>,
    receiver: mpsc::Receiver<AgentMessage>,
    /// Weak so the agent stops once every handle is dropped.
    self_sender: mpsc::WeakSender<AgentMessage>,
    notifications: broadcast::Sender<Notification>,
    cancel_token: CancellationToken,
    registry: SessionRegistry,
    runtimes: HashMap<ChannelId, SessionRuntime>,
    next_attempt: u64,
    signed_out: bool,
}

impl CallAgent {
    #[instrument(skip_all, name = "call.agent")]
    async fn run(mut self) {
        info!(target: "call.agent", identity = %self.config.identity, "CallAgent started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "call.agent", "CallAgent received cancellation signal");
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if !self.handle_message(message).await {
                                break;
                            }
                        }
                        None => {
                            info!(target: "call.agent", "CallAgent channel closed, exiting");
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                event = next_bus_event(&mut self.connection) => {
                    self.handle_bus_event(event).await;
                }
            }
        }

        info!(target: "call.agent", identity = %self.config.identity, "CallAgent stopped");
    }

    /// Returns `false` once the agent should stop.
    async fn handle_message(&mut self, message: AgentMessage) -> bool {
        match message {
            AgentMessage::Call {
                peer,
                call_type,
                respond_to,
            } => {
                let result = self.call(peer, call_type).await;
                let _ = respond_to.send(result);
            }

            AgentMessage::Accept {
                channel,
                respond_to,
            } => {
                let result = self.accept(&channel).await;
                let _ = respond_to.send(result);
            }

            AgentMessage::Reject {
                channel,
                respond_to,
            } => {
                let result = self.reject(&channel).await;
                let _ = respond_to.send(result);
            }

            AgentMessage::End {
                channel,
                respond_to,
            } => {
                let result = self.end(&channel).await;
                let _ = respond_to.send(result);
            }

            AgentMessage::Sessions { respond_to } => {
                let _ = respond_to.send(self.registry.records());
            }

            AgentMessage::Session {
                channel,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.get(&channel).cloned());
            }

            AgentMessage::Shutdown { respond_to } => {
                self.shutdown().await;
                let _ = respond_to.send(());
                return false;
            }

            AgentMessage::InviteTimeout { channel, attempt } => {
                self.on_invite_timeout(&channel, attempt).await;
            }

            AgentMessage::Media {
                channel,
                attempt,
                event,
            } => {
                self.on_media_event(&channel, attempt, event).await;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // UI commands
    // ------------------------------------------------------------------

    async fn call(&mut self, peer: IdentityId, call_type: CallType) -> Result<ChannelId, CallError> {
        self.ensure_connected()?;
        let me = self.config.identity.clone();
        let record = CallSessionRecord::new(me.clone(), peer.clone(), call_type, now())?;
        let channel = record.channel_id.clone();

        if self.registry.get(&channel).is_some() {
            return Err(CallError::AlreadyInSession);
        }
        if self.registry.len() >= self.config.max_concurrent_sessions {
            return Err(CallError::Busy);
        }

        self.open_session(record)?;
        self.apply(&channel, CallEvent::InviteSent).await?;

        let invite = CallEnvelope::invite(
            me,
            channel.clone(),
            call_type,
            self.config.display_name.clone(),
        );
        if let Err(e) = self.send_envelope(&peer, invite).await {
            debug!(target: "call.agent", channel = %channel, error = %e, "Invite not delivered");
            let _ = self.apply(&channel, CallEvent::PeerOffline).await;
            return Err(e);
        }

        self.apply(&channel, CallEvent::InviteDelivered).await?;
        self.start_invite_timer(&channel);
        self.watch_peer(&peer).await;
        Ok(channel)
    }

    async fn accept(&mut self, channel: &ChannelId) -> Result<(), CallError> {
        self.ensure_connected()?;
        let record = self.ringing_remote(channel, "accept")?;
        let peer = record.peer_of(&self.config.identity).clone();

        let accepted =
            CallEnvelope::accepted(self.config.identity.clone(), channel.clone(), record.call_type);
        if let Err(e) = self.send_envelope(&peer, accepted).await {
            let _ = self.apply(channel, CallEvent::PeerOffline).await;
            return Err(e);
        }

        self.apply(channel, CallEvent::Accept).await?;
        self.start_media(channel).await
    }

    async fn reject(&mut self, channel: &ChannelId) -> Result<(), CallError> {
        let record = self.ringing_remote(channel, "reject")?;
        let peer = record.peer_of(&self.config.identity).clone();

        let rejected = CallEnvelope::rejected(
            self.config.identity.clone(),
            channel.clone(),
            record.call_type,
            None,
        );
        self.send_quietly(&peer, rejected).await;
        self.apply(channel, CallEvent::Reject).await.map(|_| ())
    }

    async fn end(&mut self, channel: &ChannelId) -> Result<(), CallError> {
        let record = self
            .registry
            .get(channel)
            .cloned()
            .ok_or(CallError::SessionNotFound)?;
        // Validate before telling the peer.
        record
            .state
            .apply(CallEvent::EndLocal)
            .map_err(|e| CallError::InvalidTransition(e.to_string()))?;

        let peer = record.peer_of(&self.config.identity).clone();
        let ended = CallEnvelope::ended(
            self.config.identity.clone(),
            channel.clone(),
            record.call_type,
            None,
        );
        self.send_quietly(&peer, ended).await;
        self.apply(channel, CallEvent::EndLocal).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Bus events
    // ------------------------------------------------------------------

    async fn handle_bus_event(&mut self, event: Option<BusEvent>) {
        match event {
            Some(BusEvent::Message(envelope)) => self.on_envelope(envelope).await,
            Some(BusEvent::Presence(PeerPresence {
                peer,
                online: false,
            })) => self.on_peer_offline(&peer).await,
            Some(BusEvent::Presence(_) | BusEvent::ConnectionState(ConnectionState::Connected)) => {}
            Some(BusEvent::ConnectionState(ConnectionState::Superseded)) => {
                self.on_superseded().await;
            }
            Some(BusEvent::ConnectionState(
                ConnectionState::Disconnected | ConnectionState::Closed,
            ))
            | None => self.reconnect().await,
        }
    }

    async fn on_envelope(&mut self, envelope: CallEnvelope) {
        let channel = envelope.channel_id.clone();
        if channel.peer_of(&self.config.identity).as_ref() != Some(&envelope.from_id) {
            warn!(
                target: "call.agent",
                kind = envelope.kind.as_str(),
                "Envelope for a channel between other identities dropped"
            );
            return;
        }

        match envelope.kind {
            EnvelopeType::Invite => self.on_invite(envelope).await,
            EnvelopeType::Accepted => self.on_accepted(&channel).await,
            EnvelopeType::Rejected => {
                if self.registry.get(&channel).is_none() {
                    return;
                }
                match self.apply(&channel, CallEvent::RejectedReceived).await {
                    Ok(_) => {
                        if matches!(
                            envelope.reason(),
                            Some(REASON_BUSY | REASON_ALREADY_IN_SESSION)
                        ) {
                            self.notify(Notification::Busy {
                                channel,
                                peer: envelope.from_id,
                            });
                        }
                    }
                    Err(e) => {
                        debug!(target: "call.agent", error = %e, "Stale rejected envelope ignored");
                    }
                }
            }
            EnvelopeType::Ended => {
                if self.registry.get(&channel).is_some() {
                    if let Err(e) = self.apply(&channel, CallEvent::EndedReceived).await {
                        debug!(target: "call.agent", error = %e, "Stale ended envelope ignored");
                    }
                }
            }
        }
    }

    async fn on_invite(&mut self, envelope: CallEnvelope) {
        let me = self.config.identity.clone();
        let channel = envelope.channel_id.clone();
        let from = envelope.from_id.clone();

        // The existing session is left exactly as it is.
        if self.registry.get(&channel).is_some() {
            info!(target: "call.agent", channel = %channel, "Duplicate invite rejected");
            record_invite_declined("already_in_session");
            let rejected = CallEnvelope::rejected(
                me,
                channel,
                envelope.call_type,
                Some(REASON_ALREADY_IN_SESSION),
            );
            self.send_quietly(&from, rejected).await;
            return;
        }

        if self.registry.len() >= self.config.max_concurrent_sessions {
            info!(target: "call.agent", channel = %channel, "Invite declined while busy");
            record_invite_declined("busy");
            let rejected =
                CallEnvelope::rejected(me, channel.clone(), envelope.call_type, Some(REASON_BUSY));
            self.send_quietly(&from, rejected).await;
            self.notify(Notification::Busy {
                channel,
                peer: from,
            });
            return;
        }

        let record = match CallSessionRecord::new(from.clone(), me, envelope.call_type, now()) {
            Ok(record) => record,
            Err(e) => {
                warn!(target: "call.agent", error = %e, "Invite with invalid members dropped");
                return;
            }
        };
        if let Err(e) = self.open_session(record) {
            warn!(target: "call.agent", error = %e, "Invite could not open a session");
            return;
        }
        if self.apply(&channel, CallEvent::InviteReceived).await.is_err() {
            return;
        }

        self.start_invite_timer(&channel);
        self.notify(Notification::IncomingCall {
            channel,
            from: from.clone(),
            caller_name: envelope.payload.caller_name.unwrap_or_else(|| from.to_string()),
            call_type: envelope.call_type,
        });
        self.watch_peer(&from).await;
    }

    async fn on_accepted(&mut self, channel: &ChannelId) {
        let is_ringing_local = self
            .registry
            .get(channel)
            .is_some_and(|r| r.state == CallState::RingingLocal);
        if !is_ringing_local {
            debug!(target: "call.agent", channel = %channel, "Unexpected accepted envelope ignored");
            return;
        }

        if self.apply(channel, CallEvent::AcceptedReceived).await.is_ok() {
            // Failures are announced as notifications; nobody awaits this.
            let _ = self.start_media(channel).await;
        }
    }

    async fn on_peer_offline(&mut self, peer: &IdentityId) {
        for channel in self.registry.channels_with(peer) {
            info!(target: "call.agent", channel = %channel, "Peer went offline");
            if let Err(e) = self.apply(&channel, CallEvent::PeerOffline).await {
                debug!(target: "call.agent", error = %e, "Offline transition skipped");
            }
        }
    }

    async fn on_superseded(&mut self) {
        warn!(target: "call.agent", "Bus connection superseded by another login, signing out");
        self.connection = None;
        self.signed_out = true;
        self.end_all(false).await;
        self.notify(Notification::SignedOut);
    }

    /// Reconnect with a fresh bus token. Live sessions do not survive the
    /// lost connection.
    async fn reconnect(&mut self) {
        self.connection = None;
        warn!(target: "call.agent", "Bus connection lost, reconnecting");
        self.drop_stale_sessions().await;

        let mut last_error = CallError::PeerUnreachable;
        for attempt in 1..=self.config.max_reconnect_attempts {
            let delay = self.config.reconnect_backoff.saturating_mul(attempt);
            tokio::select! {
                () = self.cancel_token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match open_connection(&self.config, &self.bus).await {
                Ok(connection) => {
                    info!(target: "call.agent", attempt, "Bus connection re-established");
                    record_reconnect("success");
                    self.connection = Some(connection);
                    return;
                }
                Err(e) => {
                    warn!(target: "call.agent", attempt, error = %e, "Bus reconnect failed");
                    record_reconnect(e.label());
                    last_error = e;
                }
            }
        }

        error!(target: "call.agent", "Bus reconnect attempts exhausted");
        self.end_all(false).await;
        let error = match last_error {
            CallError::AuthFailure | CallError::Unauthorized(_) => CallError::AuthFailure,
            _ => CallError::PeerUnreachable,
        };
        self.notify(Notification::Error {
            channel: None,
            error,
        });
    }

    /// The hub announced this identity offline to every watching peer, so
    /// each peer has already ended its side. Nothing can be sent until the
    /// connection is back.
    async fn drop_stale_sessions(&mut self) {
        for record in self.registry.records() {
            let channel = record.channel_id;
            info!(target: "call.agent", channel = %channel, "Session lost with the bus connection");
            if let Err(e) = self.apply(&channel, CallEvent::ConnectionLost).await {
                warn!(target: "call.agent", error = %e, "Session could not be ended cleanly");
                self.registry.remove(&channel);
                self.release(&channel).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers and media
    // ------------------------------------------------------------------

    fn start_invite_timer(&mut self, channel: &ChannelId) {
        let Some(timeout) = self.config.invite_timeout else {
            return;
        };
        let Some(runtime) = self.runtimes.get_mut(channel) else {
            return;
        };

        let cancel = self.cancel_token.child_token();
        runtime.timer = Some(cancel.clone());
        let attempt = runtime.attempt;
        let channel = channel.clone();
        let mailbox = self.self_sender.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(sender) = mailbox.upgrade() {
                        let _ = sender.send(AgentMessage::InviteTimeout { channel, attempt }).await;
                    }
                }
            }
        });
    }

    async fn on_invite_timeout(&mut self, channel: &ChannelId, attempt: u64) {
        if !self.is_current(channel, attempt) {
            return;
        }
        let Some(record) = self.registry.get(channel).cloned() else {
            return;
        };
        if !record.state.is_ringing() {
            return;
        }

        info!(target: "call.agent", channel = %channel, "Invite timed out");
        let peer = record.peer_of(&self.config.identity).clone();
        let ended = CallEnvelope::ended(
            self.config.identity.clone(),
            channel.clone(),
            record.call_type,
            Some(REASON_TIMEOUT),
        );
        self.send_quietly(&peer, ended).await;
        let _ = self.apply(channel, CallEvent::Timeout).await;
    }

    /// Join media for an active session. On failure the peer is told, the
    /// session ends and the error is announced.
    async fn start_media(&mut self, channel: &ChannelId) -> Result<(), CallError> {
        let Some(record) = self.registry.get(channel).cloned() else {
            return Err(CallError::SessionNotFound);
        };

        match self.join_media(&record).await {
            Ok(media) => {
                record_media_join("success");
                match self.runtimes.get_mut(channel) {
                    Some(runtime) => runtime.media = Some(media),
                    None => media.teardown().await,
                }
                Ok(())
            }
            Err(error) => {
                warn!(target: "call.agent", channel = %channel, error = %error, "Media join failed");
                record_media_join(error.label());
                let peer = record.peer_of(&self.config.identity).clone();
                let ended = CallEnvelope::ended(
                    self.config.identity.clone(),
                    channel.clone(),
                    record.call_type,
                    Some(REASON_MEDIA_FAILURE),
                );
                self.send_quietly(&peer, ended).await;
                let _ = self.apply(channel, CallEvent::MediaFailed).await;
                self.notify(Notification::Error {
                    channel: Some(channel.clone()),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn join_media(&self, record: &CallSessionRecord) -> Result<ActiveMedia, CallError> {
        let channel = &record.channel_id;
        let me = &self.config.identity;
        let tokens = Arc::clone(&self.config.token_source);
        let attempt_id = self
            .runtimes
            .get(channel)
            .map(|r| r.attempt)
            .ok_or(CallError::SessionNotFound)?;
        let bridge = self.config.media.create();

        for attempt in 1..=MEDIA_JOIN_ATTEMPTS {
            // Every join gets a freshly issued token.
            let token = with_one_retry("media token", || tokens.media_token(me, channel)).await?;

            let tracks = match bridge
                .join(&self.config.app_credential, channel, &token, me)
                .await
            {
                Ok(tracks) => tracks,
                Err(e) => {
                    warn!(target: "call.agent", attempt, error = %e, "Media join rejected");
                    continue;
                }
            };

            let media = ActiveMedia {
                bridge: Arc::clone(&bridge),
                tracks,
                call_type: record.call_type,
                events_cancel: self.cancel_token.child_token(),
            };
            if let Err(e) = bridge
                .publish(&media.tracks.publishable(record.call_type))
                .await
            {
                warn!(target: "call.agent", attempt, error = %e, "Publishing local tracks failed");
                media.teardown().await;
                continue;
            }

            if let Some(events) = bridge.events() {
                self.forward_media_events(
                    channel.clone(),
                    attempt_id,
                    events,
                    media.events_cancel.clone(),
                );
            }
            return Ok(media);
        }

        Err(CallError::MediaJoinFailure)
    }

    fn forward_media_events(
        &self,
        channel: ChannelId,
        attempt: u64,
        mut events: mpsc::Receiver<MediaEvent>,
        cancel: CancellationToken,
    ) {
        let mailbox = self.self_sender.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let Some(sender) = mailbox.upgrade() else { break };
                        let message = AgentMessage::Media {
                            channel: channel.clone(),
                            attempt,
                            event,
                        };
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn on_media_event(&mut self, channel: &ChannelId, attempt: u64, event: MediaEvent) {
        if !self.is_current(channel, attempt) {
            return;
        }

        match event {
            MediaEvent::PeerJoined(peer) => self.notify(Notification::PeerJoined {
                channel: channel.clone(),
                peer,
            }),
            MediaEvent::PeerLeft(peer) => self.notify(Notification::PeerLeft {
                channel: channel.clone(),
                peer,
            }),
            MediaEvent::PeerPublished { peer, kind } => {
                let Some(media) = self.runtimes.get(channel).and_then(|r| r.media.as_ref()) else {
                    return;
                };
                if !kind.allowed_for(media.call_type) {
                    return;
                }
                if let Err(e) = media.bridge.subscribe(&peer, kind).await {
                    warn!(
                        target: "call.agent",
                        kind = kind.as_str(),
                        error = %e,
                        "Subscribing to peer track failed"
                    );
                }
            }
            MediaEvent::PeerUnpublished { kind, .. } => {
                debug!(target: "call.agent", kind = kind.as_str(), "Peer unpublished track");
            }
        }
    }

    // ------------------------------------------------------------------
    // Session bookkeeping
    // ------------------------------------------------------------------

    fn open_session(&mut self, record: CallSessionRecord) -> Result<(), CallError> {
        let channel = record.channel_id.clone();
        self.registry.insert(record)?;
        self.next_attempt += 1;
        self.runtimes.insert(
            channel,
            SessionRuntime {
                attempt: self.next_attempt,
                timer: None,
                media: None,
            },
        );
        Ok(())
    }

    /// Apply `event`, release the session if it became terminal, then
    /// announce the new state.
    async fn apply(
        &mut self,
        channel: &ChannelId,
        event: CallEvent,
    ) -> Result<CallSessionRecord, CallError> {
        let record = self.registry.transition(channel, event)?;
        debug!(
            target: "call.agent",
            channel = %channel,
            event = ?event,
            state = %record.state,
            "Session transition"
        );

        if record.state == CallState::Active {
            if let Some(timer) = self.runtimes.get_mut(channel).and_then(|r| r.timer.take()) {
                timer.cancel();
            }
        }

        if record.state.is_terminal() {
            self.release(channel).await;
            record_session_outcome(record.state.as_str());
            let peer = record.peer_of(&self.config.identity).clone();
            self.unwatch_peer(&peer).await;
        }

        self.notify(Notification::StateChanged {
            channel: channel.clone(),
            state: record.state,
        });
        self.check_invariant();
        Ok(record)
    }

    async fn release(&mut self, channel: &ChannelId) {
        let Some(runtime) = self.runtimes.remove(channel) else {
            return;
        };
        if let Some(timer) = runtime.timer {
            timer.cancel();
        }
        if let Some(media) = runtime.media {
            media.teardown().await;
        }
    }

    /// End every live session. `notify_peers` sends `ended` to each peer.
    async fn end_all(&mut self, notify_peers: bool) {
        for record in self.registry.records() {
            let channel = record.channel_id.clone();
            if notify_peers {
                let peer = record.peer_of(&self.config.identity).clone();
                let ended = CallEnvelope::ended(
                    self.config.identity.clone(),
                    channel.clone(),
                    record.call_type,
                    None,
                );
                self.send_quietly(&peer, ended).await;
            }
            if let Err(e) = self.apply(&channel, CallEvent::EndLocal).await {
                warn!(target: "call.agent", error = %e, "Session could not be ended cleanly");
                self.registry.remove(&channel);
                self.release(&channel).await;
            }
        }
    }

    async fn shutdown(&mut self) {
        let notify_peers = self.connection.is_some();
        self.end_all(notify_peers).await;
        if let Some(connection) = self.connection.take() {
            connection.disconnect().await;
        }
    }

    async fn watch_peer(&mut self, peer: &IdentityId) {
        let Some(connection) = &self.connection else {
            return;
        };
        match connection.subscribe_presence(vec![peer.clone()]).await {
            Ok(snapshot) => {
                // The peer may have dropped between delivery and subscribe.
                if snapshot.iter().any(|p| !p.online) {
                    self.on_peer_offline(peer).await;
                }
            }
            Err(e) => {
                warn!(target: "call.agent", error = %e, "Presence subscribe failed");
            }
        }
    }

    async fn unwatch_peer(&mut self, peer: &IdentityId) {
        if !self.registry.channels_with(peer).is_empty() {
            return;
        }
        if let Some(connection) = &self.connection {
            if let Err(e) = connection.unsubscribe_presence(vec![peer.clone()]).await {
                debug!(target: "call.agent", error = %e, "Presence unsubscribe failed");
            }
        }
    }

    fn ringing_remote(
        &self,
        channel: &ChannelId,
        action: &str,
    ) -> Result<CallSessionRecord, CallError> {
        let record = self
            .registry
            .get(channel)
            .cloned()
            .ok_or(CallError::SessionNotFound)?;
        if record.state != CallState::RingingRemote {
            return Err(CallError::InvalidTransition(format!(
                "cannot {action} in state {}",
                record.state
            )));
        }
        Ok(record)
    }

    fn is_current(&self, channel: &ChannelId, attempt: u64) -> bool {
        self.runtimes
            .get(channel)
            .is_some_and(|r| r.attempt == attempt)
    }

    fn ensure_connected(&self) -> Result<(), CallError> {
        if self.signed_out {
            return Err(CallError::AuthFailure);
        }
        if self.connection.is_none() {
            return Err(CallError::PeerUnreachable);
        }
        Ok(())
    }

    async fn send_envelope(
        &self,
        to: &IdentityId,
        envelope: CallEnvelope,
    ) -> Result<(), CallError> {
        let Some(connection) = &self.connection else {
            return Err(CallError::PeerUnreachable);
        };
        connection.send(to, envelope).await.map_err(CallError::from)
    }

    /// Best-effort send; the outcome does not change local state.
    async fn send_quietly(&self, to: &IdentityId, envelope: CallEnvelope) {
        let kind = envelope.kind;
        if let Err(e) = self.send_envelope(to, envelope).await {
            debug!(target: "call.agent", kind = kind.as_str(), error = %e, "Envelope not delivered");
        }
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    fn check_invariant(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        if let Err(violation) = self.registry.check_invariant() {
            error!(target: "call.agent", violation = %violation, "Session registry invariant violated");
        }
        if self.runtimes.len() != self.registry.len() {
            error!(
                target: "call.agent",
                runtimes = self.runtimes.len(),
                sessions = self.registry.len(),
                "Session runtimes out of step with registry"
            );
        }
    }
}

async fn next_bus_event(connection: &mut Option<Connection>) -> Option<BusEvent> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn open_connection(
    config: &CallAgentConfig,
    bus: &BusActorHandle,
) -> Result<Connection, CallError> {
    let tokens = Arc::clone(&config.token_source);
    let identity = &config.identity;
    let token = with_one_retry("bus token", || tokens.bus_token(identity)).await?;
    Ok(bus.connect(identity.clone(), &token).await?)
}

/// Run `op`, and once more if it fails with anything but a role error.
async fn with_one_retry<T, F, Fut>(what: &'static str, mut op: F) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(CallError::Unauthorized(reason)) => Err(CallError::Unauthorized(reason)),
        Err(first) => {
            warn!(target: "call.agent", what, error = %first, "Retrying once");
            op().await
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_one_retry_retries_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, CallError> = with_one_retry("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(CallError::Internal("flaky".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_one_retry_gives_up_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError> = with_one_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::AuthFailure)
        })
        .await;
        assert_eq!(result, Err(CallError::AuthFailure));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_one_retry_never_retries_role_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError> = with_one_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::Unauthorized("role".to_string()))
        })
        .await;
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
