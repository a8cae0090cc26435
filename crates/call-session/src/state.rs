//! Call state machine.
//!
//! ```text
//!  caller:  Idle --InviteSent--> Inviting --InviteDelivered--> RingingLocal
//!  callee:  Idle --InviteReceived--> RingingRemote
//!
//!  RingingLocal  --AcceptedReceived--> Active    --RejectedReceived--> Rejected
//!  RingingRemote --Accept-->           Active    --Reject-->           Rejected
//!  Ringing*      --EndLocal|EndedReceived--> Ended
//!  Inviting|Ringing* --PeerOffline|Timeout|ConnectionLost--> TimedOut
//!  Active --EndLocal|EndedReceived|PeerOffline|MediaFailed|ConnectionLost--> Ended
//! ```
//!
//! Terminal states accept nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// This side hung up or cancelled.
    Local,
    /// The peer hung up or cancelled.
    Remote,
    PeerOffline,
    MediaFailure,
    /// This side lost its bus connection.
    ConnectionLost,
}

/// Why a call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// This side declined.
    Local,
    /// The peer declined.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Inviting,
    /// Caller side: invite delivered, waiting for the answer.
    RingingLocal,
    /// Callee side: deciding.
    RingingRemote,
    Active,
    Ended(EndReason),
    Rejected(RejectReason),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    InviteSent,
    InviteDelivered,
    InviteReceived,
    Accept,
    AcceptedReceived,
    Reject,
    RejectedReceived,
    EndLocal,
    EndedReceived,
    PeerOffline,
    MediaFailed,
    Timeout,
    ConnectionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{event:?} is not valid in state {from}")]
pub struct InvalidTransition {
    pub from: CallState,
    pub event: CallEvent,
}

impl CallState {
    /// Apply `event`, returning the next state.
    ///
    /// # Errors
    ///
    /// [`InvalidTransition`] if `event` has no edge out of `self`.
    pub fn apply(self, event: CallEvent) -> Result<CallState, InvalidTransition> {
        use CallEvent as E;
        use CallState as S;

        let next = match (self, event) {
            (S::Idle, E::InviteSent) => S::Inviting,
            (S::Idle, E::InviteReceived) => S::RingingRemote,
            (S::Inviting, E::InviteDelivered) => S::RingingLocal,

            (S::RingingRemote, E::Accept) | (S::RingingLocal, E::AcceptedReceived) => S::Active,
            (S::RingingRemote, E::Reject) => S::Rejected(RejectReason::Local),
            (S::RingingLocal, E::RejectedReceived) => S::Rejected(RejectReason::Remote),

            (S::RingingLocal | S::RingingRemote | S::Active, E::EndLocal) => {
                S::Ended(EndReason::Local)
            }
            (S::RingingLocal | S::RingingRemote | S::Active, E::EndedReceived) => {
                S::Ended(EndReason::Remote)
            }

            (
                S::Inviting | S::RingingLocal | S::RingingRemote,
                E::PeerOffline | E::Timeout | E::ConnectionLost,
            ) => S::TimedOut,
            (S::Active, E::PeerOffline) => S::Ended(EndReason::PeerOffline),
            (S::Active, E::MediaFailed) => S::Ended(EndReason::MediaFailure),
            (S::Active, E::ConnectionLost) => S::Ended(EndReason::ConnectionLost),

            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended(_) | CallState::Rejected(_) | CallState::TimedOut
        )
    }

    /// Waiting on a decision from either side.
    #[must_use]
    pub fn is_ringing(&self) -> bool {
        matches!(self, CallState::RingingLocal | CallState::RingingRemote)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Inviting => "inviting",
            CallState::RingingLocal => "ringing_local",
            CallState::RingingRemote => "ringing_remote",
            CallState::Active => "active",
            CallState::Ended(_) => "ended",
            CallState::Rejected(_) => "rejected",
            CallState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL_EVENTS: [CallEvent; 13] = [
        CallEvent::InviteSent,
        CallEvent::InviteDelivered,
        CallEvent::InviteReceived,
        CallEvent::Accept,
        CallEvent::AcceptedReceived,
        CallEvent::Reject,
        CallEvent::RejectedReceived,
        CallEvent::EndLocal,
        CallEvent::EndedReceived,
        CallEvent::PeerOffline,
        CallEvent::MediaFailed,
        CallEvent::Timeout,
        CallEvent::ConnectionLost,
    ];

    fn run(events: &[CallEvent]) -> Result<CallState, InvalidTransition> {
        events
            .iter()
            .try_fold(CallState::Idle, |state, event| state.apply(*event))
    }

    #[test]
    fn test_caller_happy_path() {
        let state = run(&[
            CallEvent::InviteSent,
            CallEvent::InviteDelivered,
            CallEvent::AcceptedReceived,
            CallEvent::EndLocal,
        ])
        .unwrap();
        assert_eq!(state, CallState::Ended(EndReason::Local));
    }

    #[test]
    fn test_callee_happy_path() {
        let active = run(&[CallEvent::InviteReceived, CallEvent::Accept]).unwrap();
        assert_eq!(active, CallState::Active);
        assert_eq!(
            active.apply(CallEvent::EndedReceived).unwrap(),
            CallState::Ended(EndReason::Remote)
        );
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            run(&[CallEvent::InviteReceived, CallEvent::Reject]).unwrap(),
            CallState::Rejected(RejectReason::Local)
        );
        assert_eq!(
            run(&[
                CallEvent::InviteSent,
                CallEvent::InviteDelivered,
                CallEvent::RejectedReceived
            ])
            .unwrap(),
            CallState::Rejected(RejectReason::Remote)
        );
    }

    #[test]
    fn test_offline_before_active_times_out() {
        for pending in [
            vec![CallEvent::InviteSent],
            vec![CallEvent::InviteSent, CallEvent::InviteDelivered],
            vec![CallEvent::InviteReceived],
        ] {
            let state = run(&pending).unwrap();
            assert_eq!(state.apply(CallEvent::PeerOffline).unwrap(), CallState::TimedOut);
            assert_eq!(state.apply(CallEvent::Timeout).unwrap(), CallState::TimedOut);
        }
    }

    #[test]
    fn test_lost_connection_leaves_nothing_live() {
        let ringing = run(&[CallEvent::InviteReceived]).unwrap();
        assert_eq!(
            ringing.apply(CallEvent::ConnectionLost).unwrap(),
            CallState::TimedOut
        );
        let active = run(&[CallEvent::InviteReceived, CallEvent::Accept]).unwrap();
        assert_eq!(
            active.apply(CallEvent::ConnectionLost).unwrap(),
            CallState::Ended(EndReason::ConnectionLost)
        );
    }

    #[test]
    fn test_offline_or_media_failure_while_active_ends() {
        let active = run(&[CallEvent::InviteReceived, CallEvent::Accept]).unwrap();
        assert_eq!(
            active.apply(CallEvent::PeerOffline).unwrap(),
            CallState::Ended(EndReason::PeerOffline)
        );
        assert_eq!(
            active.apply(CallEvent::MediaFailed).unwrap(),
            CallState::Ended(EndReason::MediaFailure)
        );
        assert!(active.apply(CallEvent::Timeout).is_err());
    }

    #[test]
    fn test_ringing_can_be_cancelled() {
        let ringing = run(&[CallEvent::InviteSent, CallEvent::InviteDelivered]).unwrap();
        assert_eq!(
            ringing.apply(CallEvent::EndLocal).unwrap(),
            CallState::Ended(EndReason::Local)
        );
        let ringing = run(&[CallEvent::InviteReceived]).unwrap();
        assert_eq!(
            ringing.apply(CallEvent::EndedReceived).unwrap(),
            CallState::Ended(EndReason::Remote)
        );
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let terminals = [
            CallState::Ended(EndReason::Local),
            CallState::Rejected(RejectReason::Remote),
            CallState::TimedOut,
        ];
        for state in terminals {
            assert!(state.is_terminal());
            for event in ALL_EVENTS {
                assert_eq!(
                    state.apply(event),
                    Err(InvalidTransition { from: state, event })
                );
            }
        }
    }

    #[test]
    fn test_active_is_never_reached_without_answer() {
        // Only Accept and AcceptedReceived lead to Active.
        for event in ALL_EVENTS {
            for from in [
                CallState::Idle,
                CallState::Inviting,
                CallState::RingingLocal,
                CallState::RingingRemote,
            ] {
                if from.apply(event) == Ok(CallState::Active) {
                    assert!(matches!(
                        (from, event),
                        (CallState::RingingRemote, CallEvent::Accept)
                            | (CallState::RingingLocal, CallEvent::AcceptedReceived)
                    ));
                }
            }
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(CallState::Ended(EndReason::PeerOffline)).unwrap();
        assert_eq!(json["state"], "ended");
        assert_eq!(json["reason"], "peer_offline");
        assert_eq!(CallState::RingingLocal.to_string(), "ringing_local");
    }
}
