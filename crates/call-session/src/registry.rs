//! Session registry: one record per channel, removed on a terminal state.
//!
//! The channel id is derived from the unordered pair, so keying by channel
//! gives at most one live record per pair.

use crate::errors::CallError;
use crate::state::{CallEvent, CallState};
use common::types::{CallType, ChannelId, IdentityId};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSessionRecord {
    pub channel_id: ChannelId,
    pub caller_id: IdentityId,
    pub callee_id: IdentityId,
    pub call_type: CallType,
    pub state: CallState,
    /// Unix epoch seconds.
    pub created_at: i64,
}

impl CallSessionRecord {
    /// A fresh `Idle` record for `caller` calling `callee`.
    ///
    /// # Errors
    ///
    /// `InvalidPeer` if `caller == callee`.
    pub fn new(
        caller_id: IdentityId,
        callee_id: IdentityId,
        call_type: CallType,
        created_at: i64,
    ) -> Result<Self, CallError> {
        let channel_id =
            ChannelId::for_pair(&caller_id, &callee_id).map_err(|_| CallError::InvalidPeer)?;
        Ok(Self {
            channel_id,
            caller_id,
            callee_id,
            call_type,
            state: CallState::Idle,
            created_at,
        })
    }

    /// The member of the channel that is not `me`.
    #[must_use]
    pub fn peer_of(&self, me: &IdentityId) -> &IdentityId {
        if &self.caller_id == me {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }

    #[must_use]
    pub fn is_caller(&self, me: &IdentityId) -> bool {
        &self.caller_id == me
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    records: HashMap<ChannelId, CallSessionRecord>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// `AlreadyInSession` if the channel already has a live record.
    pub fn insert(&mut self, record: CallSessionRecord) -> Result<(), CallError> {
        if self.records.contains_key(&record.channel_id) {
            return Err(CallError::AlreadyInSession);
        }
        self.records.insert(record.channel_id.clone(), record);
        Ok(())
    }

    /// Apply `event` to the channel's record and return the record as it is
    /// afterwards. A record reaching a terminal state is removed.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` - no live record for the channel
    /// - `InvalidTransition` - the record is left unchanged
    pub fn transition(
        &mut self,
        channel: &ChannelId,
        event: CallEvent,
    ) -> Result<CallSessionRecord, CallError> {
        let record = self
            .records
            .get_mut(channel)
            .ok_or(CallError::SessionNotFound)?;
        record.state = record
            .state
            .apply(event)
            .map_err(|e| CallError::InvalidTransition(e.to_string()))?;

        let snapshot = record.clone();
        if snapshot.state.is_terminal() {
            self.records.remove(channel);
        }
        Ok(snapshot)
    }

    #[must_use]
    pub fn get(&self, channel: &ChannelId) -> Option<&CallSessionRecord> {
        self.records.get(channel)
    }

    pub fn remove(&mut self, channel: &ChannelId) -> Option<CallSessionRecord> {
        self.records.remove(channel)
    }

    /// Snapshot of every live record, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<CallSessionRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        records
    }

    /// Channels of live records that involve `peer`.
    #[must_use]
    pub fn channels_with(&self, peer: &IdentityId) -> Vec<ChannelId> {
        self.records
            .values()
            .filter(|r| &r.caller_id == peer || &r.callee_id == peer)
            .map(|r| r.channel_id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Verify the registry invariants.
    ///
    /// - every record is keyed by the channel of its own pair
    /// - no record is in a terminal state
    ///
    /// # Errors
    ///
    /// A description of the first violation.
    pub fn check_invariant(&self) -> Result<(), String> {
        for (key, record) in &self.records {
            let expected = ChannelId::for_pair(&record.caller_id, &record.callee_id)
                .map_err(|e| format!("record {key} has invalid members: {e}"))?;
            if &expected != key || record.channel_id != expected {
                return Err(format!("record keyed {key} belongs to channel {expected}"));
            }
            if record.state.is_terminal() {
                return Err(format!("terminal record retained for {key}"));
            }
        }
        Ok(())
    }
}
