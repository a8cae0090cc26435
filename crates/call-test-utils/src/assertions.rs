//! Waiting on call agent notifications.
//!
//! Agents announce everything through a broadcast channel. These helpers skip
//! unrelated notifications and fail the test if the expected one does not
//! arrive in time.

use call_session::state::CallState;
use call_session::Notification;
use common::types::ChannelId;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Receive until `predicate` matches and return the match.
///
/// # Panics
///
/// If nothing matches within [`NOTIFICATION_TIMEOUT`] or the agent is gone.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<Notification>,
    predicate: impl Fn(&Notification) -> bool,
) -> Notification {
    let deadline = tokio::time::Instant::now() + NOTIFICATION_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(notification)) if predicate(&notification) => return notification,
            Ok(Ok(_) | Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) => panic!("notification channel closed"),
            Err(_) => panic!("timed out waiting for notification"),
        }
    }
}

/// Wait until `channel` reports `state`.
pub async fn wait_for_state(
    rx: &mut broadcast::Receiver<Notification>,
    channel: &ChannelId,
    state: CallState,
) {
    wait_for(rx, |n| {
        matches!(n, Notification::StateChanged { channel: c, state: s } if c == channel && *s == state)
    })
    .await;
}

/// Wait for the next incoming call and return its channel.
pub async fn wait_for_incoming(rx: &mut broadcast::Receiver<Notification>) -> ChannelId {
    match wait_for(rx, |n| matches!(n, Notification::IncomingCall { .. })).await {
        Notification::IncomingCall { channel, .. } => channel,
        other => unreachable!("predicate admitted {other:?}"),
    }
}

/// Everything already queued, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut drained = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(notification) => drained.push(notification),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
        }
    }
}

/// States `channel` passed through in `notifications`, in order.
#[must_use]
pub fn states_of(notifications: &[Notification], channel: &ChannelId) -> Vec<CallState> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::StateChanged { channel: c, state } if c == channel => Some(*state),
            _ => None,
        })
        .collect()
}
