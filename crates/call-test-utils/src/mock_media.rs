//! Mock media server for call agent tests.
//!
//! One [`MockMediaServer`] stands in for the media backend. Every bridge it
//! creates joins the server's shared rooms, so two agents in the same test
//! see each other join, publish and leave. When built with a verifier, joins
//! check the media token the way the real backend does.
//!
//! # Example
//!
//! ```rust,ignore
//! use call_test_utils::MockMediaServer;
//!
//! let media = MockMediaServer::builder()
//!     .verifier(directory.verifier())
//!     .fail_next_joins(1)
//!     .build();
//!
//! // ... run a call ...
//!
//! assert_eq!(media.join_attempts().len(), 2);
//! assert!(media.members(&channel).is_empty());
//! ```

use async_trait::async_trait;
use call_session::media::{
    LocalTrack, LocalTracks, MediaBridge, MediaBridgeFactory, MediaError, MediaEvent, TrackKind,
};
use common::jwt::{AccessTokenVerifier, TokenScope};
use common::types::{ChannelId, IdentityId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const BRIDGE_EVENT_BUFFER: usize = 64;

/// A (subject, channel) pair recorded by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaVisit {
    pub subject: IdentityId,
    pub channel: ChannelId,
}

/// A remote track subscription made by a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSubscription {
    pub subscriber: IdentityId,
    pub peer: IdentityId,
    pub kind: TrackKind,
}

struct RoomMember {
    identity: IdentityId,
    events: mpsc::Sender<MediaEvent>,
    published: Vec<TrackKind>,
}

#[derive(Default)]
struct ServerState {
    rooms: HashMap<ChannelId, HashMap<u64, RoomMember>>,
    failing_joins: u32,
    next_bridge: u64,
    join_attempts: Vec<MediaVisit>,
    joins: Vec<MediaVisit>,
    leaves: Vec<MediaVisit>,
    published: Vec<(IdentityId, LocalTrack)>,
    closed_tracks: Vec<(IdentityId, LocalTrack)>,
    subscriptions: Vec<MediaSubscription>,
}

/// Shared in-memory media backend. Cheap to clone.
#[derive(Clone)]
pub struct MockMediaServer {
    state: Arc<Mutex<ServerState>>,
    verifier: Option<AccessTokenVerifier>,
    app_credential: Option<String>,
}

impl std::fmt::Debug for MockMediaServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMediaServer")
            .field("verifies_tokens", &self.verifier.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for MockMediaServer {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockMediaServer {
    #[must_use]
    pub fn builder() -> MockMediaServerBuilder {
        MockMediaServerBuilder::default()
    }

    /// Reject the next `n` joins regardless of token.
    pub fn fail_next_joins(&self, n: u32) {
        self.lock().failing_joins = n;
    }

    /// Every join attempt, successful or not, in order.
    #[must_use]
    pub fn join_attempts(&self) -> Vec<MediaVisit> {
        self.lock().join_attempts.clone()
    }

    #[must_use]
    pub fn joins(&self) -> Vec<MediaVisit> {
        self.lock().joins.clone()
    }

    #[must_use]
    pub fn leaves(&self) -> Vec<MediaVisit> {
        self.lock().leaves.clone()
    }

    /// Tracks published by `subject`.
    #[must_use]
    pub fn published_by(&self, subject: &IdentityId) -> Vec<TrackKind> {
        self.lock()
            .published
            .iter()
            .filter(|(who, _)| who == subject)
            .map(|(_, track)| track.kind)
            .collect()
    }

    /// Tracks closed by `subject`.
    #[must_use]
    pub fn closed_by(&self, subject: &IdentityId) -> Vec<TrackKind> {
        self.lock()
            .closed_tracks
            .iter()
            .filter(|(who, _)| who == subject)
            .map(|(_, track)| track.kind)
            .collect()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<MediaSubscription> {
        self.lock().subscriptions.clone()
    }

    /// Identities currently in `channel`'s room, sorted.
    #[must_use]
    pub fn members(&self, channel: &ChannelId) -> Vec<IdentityId> {
        let state = self.lock();
        let mut members: Vec<_> = state
            .rooms
            .get(channel)
            .map(|room| room.values().map(|m| m.identity.clone()).collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().expect("mock media state poisoned")
    }

    fn check_join(
        &self,
        app_credential: &str,
        channel: &ChannelId,
        token: &str,
        subject: &IdentityId,
    ) -> Result<(), MediaError> {
        if let Some(expected) = &self.app_credential {
            if app_credential != expected {
                return Err(MediaError::JoinRejected("unknown app credential".to_string()));
            }
        }
        if let Some(verifier) = &self.verifier {
            let now = chrono::Utc::now().timestamp();
            verifier
                .verify_access(token, TokenScope::Media, subject, Some(channel), now)
                .map_err(|e| MediaError::JoinRejected(e.to_string()))?;
        }
        Ok(())
    }
}

impl MediaBridgeFactory for MockMediaServer {
    fn create(&self) -> Arc<dyn MediaBridge> {
        let id = {
            let mut state = self.lock();
            state.next_bridge += 1;
            state.next_bridge
        };
        let (events_tx, events_rx) = mpsc::channel(BRIDGE_EVENT_BUFFER);
        Arc::new(MockMediaBridge {
            id,
            server: self.clone(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            joined: Mutex::new(None),
        })
    }
}

/// Builder for [`MockMediaServer`].
#[derive(Debug, Default)]
pub struct MockMediaServerBuilder {
    verifier: Option<AccessTokenVerifier>,
    app_credential: Option<String>,
    failing_joins: u32,
}

impl MockMediaServerBuilder {
    /// Verify media tokens on join.
    #[must_use]
    pub fn verifier(mut self, verifier: AccessTokenVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Reject joins that present any other app credential.
    #[must_use]
    pub fn app_credential(mut self, credential: impl Into<String>) -> Self {
        self.app_credential = Some(credential.into());
        self
    }

    #[must_use]
    pub fn fail_next_joins(mut self, n: u32) -> Self {
        self.failing_joins = n;
        self
    }

    #[must_use]
    pub fn build(self) -> MockMediaServer {
        MockMediaServer {
            state: Arc::new(Mutex::new(ServerState {
                failing_joins: self.failing_joins,
                ..ServerState::default()
            })),
            verifier: self.verifier,
            app_credential: self.app_credential,
        }
    }
}

/// One bridge created by [`MockMediaServer`].
pub struct MockMediaBridge {
    id: u64,
    server: MockMediaServer,
    events_tx: mpsc::Sender<MediaEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<MediaEvent>>>,
    joined: Mutex<Option<MediaVisit>>,
}

impl MockMediaBridge {
    fn joined(&self) -> Result<MediaVisit, MediaError> {
        self.joined
            .lock()
            .expect("bridge state poisoned")
            .clone()
            .ok_or(MediaError::NotJoined)
    }
}

#[async_trait]
impl MediaBridge for MockMediaBridge {
    async fn join(
        &self,
        app_credential: &str,
        channel: &ChannelId,
        token: &str,
        subject: &IdentityId,
    ) -> Result<LocalTracks, MediaError> {
        let visit = MediaVisit {
            subject: subject.clone(),
            channel: channel.clone(),
        };
        let mut state = self.server.lock();
        state.join_attempts.push(visit.clone());

        if state.failing_joins > 0 {
            state.failing_joins -= 1;
            return Err(MediaError::JoinRejected("injected failure".to_string()));
        }
        self.server
            .check_join(app_credential, channel, token, subject)?;

        let room = state.rooms.entry(channel.clone()).or_default();
        for member in room.values() {
            let _ = self.events_tx.try_send(MediaEvent::PeerJoined(member.identity.clone()));
            for kind in &member.published {
                let _ = self.events_tx.try_send(MediaEvent::PeerPublished {
                    peer: member.identity.clone(),
                    kind: *kind,
                });
            }
            let _ = member.events.try_send(MediaEvent::PeerJoined(subject.clone()));
        }
        room.insert(
            self.id,
            RoomMember {
                identity: subject.clone(),
                events: self.events_tx.clone(),
                published: Vec::new(),
            },
        );
        state.joins.push(visit.clone());
        drop(state);

        *self.joined.lock().expect("bridge state poisoned") = Some(visit);

        Ok(LocalTracks {
            tracks: vec![
                LocalTrack {
                    id: format!("mic-{}", self.id),
                    kind: TrackKind::Mic,
                },
                LocalTrack {
                    id: format!("camera-{}", self.id),
                    kind: TrackKind::Camera,
                },
            ],
        })
    }

    async fn publish(&self, tracks: &[LocalTrack]) -> Result<(), MediaError> {
        let visit = self.joined()?;
        let mut state = self.server.lock();
        for track in tracks {
            state.published.push((visit.subject.clone(), track.clone()));
        }

        let Some(room) = state.rooms.get_mut(&visit.channel) else {
            return Err(MediaError::NotJoined);
        };
        if let Some(me) = room.get_mut(&self.id) {
            me.published.extend(tracks.iter().map(|t| t.kind));
        }
        for (id, member) in room.iter() {
            if *id == self.id {
                continue;
            }
            for track in tracks {
                let _ = member.events.try_send(MediaEvent::PeerPublished {
                    peer: visit.subject.clone(),
                    kind: track.kind,
                });
            }
        }
        Ok(())
    }

    async fn subscribe(&self, peer: &IdentityId, kind: TrackKind) -> Result<(), MediaError> {
        let visit = self.joined()?;
        self.server.lock().subscriptions.push(MediaSubscription {
            subscriber: visit.subject,
            peer: peer.clone(),
            kind,
        });
        Ok(())
    }

    async fn close_track(&self, track: &LocalTrack) {
        let Ok(visit) = self.joined() else {
            return;
        };
        self.server
            .lock()
            .closed_tracks
            .push((visit.subject, track.clone()));
    }

    async fn leave(&self) {
        let Some(visit) = self.joined.lock().expect("bridge state poisoned").take() else {
            return;
        };

        let mut state = self.server.lock();
        if let Some(room) = state.rooms.get_mut(&visit.channel) {
            room.remove(&self.id);
            for member in room.values() {
                let _ = member
                    .events
                    .try_send(MediaEvent::PeerLeft(visit.subject.clone()));
            }
            if room.is_empty() {
                state.rooms.remove(&visit.channel);
            }
        }
        state.leaves.push(visit);
    }

    fn events(&self) -> Option<mpsc::Receiver<MediaEvent>> {
        self.events_rx.lock().expect("bridge state poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn channel() -> ChannelId {
        ChannelId::for_pair(&id("alice"), &id("bob")).unwrap()
    }

    #[tokio::test]
    async fn test_bridges_see_each_other() {
        let server = MockMediaServer::default();
        let ch = channel();

        let alice = server.create();
        let mut alice_events = alice.events().unwrap();
        let tracks = alice.join("", &ch, "token", &id("alice")).await.unwrap();
        alice.publish(&tracks.tracks[..1]).await.unwrap();

        let bob = server.create();
        let mut bob_events = bob.events().unwrap();
        bob.join("", &ch, "token", &id("bob")).await.unwrap();

        assert_eq!(alice_events.recv().await, Some(MediaEvent::PeerJoined(id("bob"))));
        assert_eq!(bob_events.recv().await, Some(MediaEvent::PeerJoined(id("alice"))));
        assert_eq!(
            bob_events.recv().await,
            Some(MediaEvent::PeerPublished {
                peer: id("alice"),
                kind: TrackKind::Mic
            })
        );
        assert_eq!(server.members(&ch), vec![id("alice"), id("bob")]);

        bob.leave().await;
        assert_eq!(alice_events.recv().await, Some(MediaEvent::PeerLeft(id("bob"))));
        assert_eq!(server.members(&ch), vec![id("alice")]);
        assert!(bob.events().is_none());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let server = MockMediaServer::builder().fail_next_joins(1).build();
        let bridge = server.create();

        assert!(bridge.join("", &channel(), "t", &id("alice")).await.is_err());
        assert!(bridge.join("", &channel(), "t", &id("alice")).await.is_ok());
        assert_eq!(server.join_attempts().len(), 2);
        assert_eq!(server.joins().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_before_join_fails() {
        let server = MockMediaServer::default();
        let bridge = server.create();
        let result = bridge.publish(&[]).await;
        assert_eq!(result, Err(MediaError::NotJoined));
    }
}
