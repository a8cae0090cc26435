//! Media bridge contract.
//!
//! The bridge is the external audio/video transport. The agent joins it once
//! a call is active and releases it on every exit path: close every local
//! track, stop consuming events, then leave.

use async_trait::async_trait;
use common::types::{CallType, ChannelId, IdentityId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Mic,
    Camera,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Mic => "mic",
            TrackKind::Camera => "camera",
        }
    }

    /// Whether a call of `call_type` carries this kind of track.
    #[must_use]
    pub fn allowed_for(&self, call_type: CallType) -> bool {
        match self {
            TrackKind::Mic => true,
            TrackKind::Camera => call_type == CallType::Video,
        }
    }
}

/// A local track created by a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Tracks created by a join. A join creates every kind; the call type decides
/// which are published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalTracks {
    pub tracks: Vec<LocalTrack>,
}

impl LocalTracks {
    /// The tracks a `call_type` call publishes: mic only for audio, mic and
    /// camera for video.
    #[must_use]
    pub fn publishable(&self, call_type: CallType) -> Vec<LocalTrack> {
        self.tracks
            .iter()
            .filter(|t| t.kind.allowed_for(call_type))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    PeerJoined(IdentityId),
    PeerLeft(IdentityId),
    PeerPublished { peer: IdentityId, kind: TrackKind },
    PeerUnpublished { peer: IdentityId, kind: TrackKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("join rejected: {0}")]
    JoinRejected(String),

    #[error("not joined")]
    NotJoined,

    #[error("transport error: {0}")]
    Transport(String),
}

/// One media session. Created per call by a [`MediaBridgeFactory`].
#[async_trait]
pub trait MediaBridge: Send + Sync {
    /// Join `channel` as `subject` with a media token scoped to it.
    async fn join(
        &self,
        app_credential: &str,
        channel: &ChannelId,
        token: &str,
        subject: &IdentityId,
    ) -> Result<LocalTracks, MediaError>;

    async fn publish(&self, tracks: &[LocalTrack]) -> Result<(), MediaError>;

    /// Receive `peer`'s track of `kind`.
    async fn subscribe(&self, peer: &IdentityId, kind: TrackKind) -> Result<(), MediaError>;

    async fn close_track(&self, track: &LocalTrack);

    async fn leave(&self);

    /// Take the event stream. Returns `None` after the first call.
    fn events(&self) -> Option<mpsc::Receiver<MediaEvent>>;
}

pub trait MediaBridgeFactory: Send + Sync {
    fn create(&self) -> Arc<dyn MediaBridge>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks() -> LocalTracks {
        LocalTracks {
            tracks: vec![
                LocalTrack {
                    id: "m".to_string(),
                    kind: TrackKind::Mic,
                },
                LocalTrack {
                    id: "c".to_string(),
                    kind: TrackKind::Camera,
                },
            ],
        }
    }

    #[test]
    fn test_audio_publishes_mic_only() {
        let published = tracks().publishable(CallType::Audio);
        assert_eq!(published.len(), 1);
        assert!(published.iter().all(|t| t.kind == TrackKind::Mic));
    }

    #[test]
    fn test_video_publishes_both() {
        assert_eq!(tracks().publishable(CallType::Video).len(), 2);
        assert!(TrackKind::Camera.allowed_for(CallType::Video));
        assert!(!TrackKind::Camera.allowed_for(CallType::Audio));
    }
}
