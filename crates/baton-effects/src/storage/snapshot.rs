//! Store state and its portable snapshot
//!
//! `StoreState` is the indexed in-memory layout. `StoreSnapshot` is the
//! flat row form written to disk by the CLI and read back for offline
//! sweeps, so map keys never have to round-trip through JSON object keys.

use super::memory::MemoryStore;
use baton_core::{
    DerivedKind, Event, EventId, Membership, ParticipantId, PhysicalTime, PresenceRecord,
    RateLimitCounter, ReliabilityRecord, Session, SessionId, StoreConfig, StoreError, TurnState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Indexed store contents guarded by the store's critical section
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) sessions: BTreeMap<SessionId, Session>,
    pub(crate) members: BTreeMap<SessionId, Vec<Membership>>,
    pub(crate) turns: BTreeMap<SessionId, TurnState>,
    pub(crate) events: BTreeMap<SessionId, Vec<Event>>,
    pub(crate) next_event_id: EventId,
    pub(crate) presence: BTreeMap<SessionId, BTreeMap<ParticipantId, PhysicalTime>>,
    pub(crate) reliability: BTreeMap<ParticipantId, ReliabilityRecord>,
    pub(crate) rate_limits: BTreeMap<String, RateLimitCounter>,
    pub(crate) derived: BTreeMap<SessionId, BTreeMap<DerivedKind, PhysicalTime>>,
}

/// Derived-view freshness row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedRecord {
    /// Session
    pub session_id: SessionId,
    /// View
    pub kind: DerivedKind,
    /// Last recomputation
    pub updated_at: PhysicalTime,
}

/// Row-oriented copy of a whole store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub sessions: Vec<Session>,
    pub members: Vec<Membership>,
    pub turns: Vec<TurnState>,
    pub events: Vec<Event>,
    pub presence: Vec<PresenceRecord>,
    pub reliability: Vec<ReliabilityRecord>,
    pub rate_limits: Vec<RateLimitCounter>,
    pub derived: Vec<DerivedRecord>,
}

impl StoreSnapshot {
    /// Read a snapshot from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the snapshot as pretty JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn into_state(self) -> Result<StoreState, StoreError> {
        let mut state = StoreState::default();

        for session in self.sessions {
            state.sessions.insert(session.id, session);
        }
        for member in self.members {
            if !state.sessions.contains_key(&member.session_id) {
                return Err(StoreError::Corrupt {
                    reason: format!(
                        "membership of {} references unknown {}",
                        member.participant_id, member.session_id
                    ),
                });
            }
            state.members.entry(member.session_id).or_default().push(member);
        }
        for turn in self.turns {
            state.turns.insert(turn.session_id, turn);
        }
        if let Some(missing) = state.sessions.keys().find(|id| !state.turns.contains_key(id)) {
            return Err(StoreError::Corrupt {
                reason: format!("session {missing} has no turn state"),
            });
        }

        let mut events = self.events;
        events.sort_by_key(Event::cursor);
        for event in events {
            state.next_event_id = state.next_event_id.max(event.id);
            state.events.entry(event.session_id).or_default().push(event);
        }

        for seen in self.presence {
            state
                .presence
                .entry(seen.session_id)
                .or_default()
                .insert(seen.participant_id, seen.last_seen);
        }
        for record in self.reliability {
            state.reliability.insert(record.participant_id, record);
        }
        for counter in self.rate_limits {
            state.rate_limits.insert(counter.key.clone(), counter);
        }
        for view in self.derived {
            state
                .derived
                .entry(view.session_id)
                .or_default()
                .insert(view.kind, view.updated_at);
        }
        Ok(state)
    }

    fn from_state(state: &StoreState) -> Self {
        Self {
            sessions: state.sessions.values().cloned().collect(),
            members: state.members.values().flatten().cloned().collect(),
            turns: state.turns.values().cloned().collect(),
            events: state.events.values().flatten().cloned().collect(),
            presence: state
                .presence
                .iter()
                .flat_map(|(session_id, seen)| {
                    seen.iter().map(|(participant_id, last_seen)| PresenceRecord {
                        session_id: *session_id,
                        participant_id: *participant_id,
                        last_seen: *last_seen,
                    })
                })
                .collect(),
            reliability: state.reliability.values().cloned().collect(),
            rate_limits: state.rate_limits.values().cloned().collect(),
            derived: state
                .derived
                .iter()
                .flat_map(|(session_id, views)| {
                    views.iter().map(|(kind, updated_at)| DerivedRecord {
                        session_id: *session_id,
                        kind: *kind,
                        updated_at: *updated_at,
                    })
                })
                .collect(),
        }
    }
}

impl MemoryStore {
    /// Copy the whole store
    pub async fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let state = self.lock().await?;
        Ok(StoreSnapshot::from_state(&state))
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot, config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(Self::from_state(snapshot.into_state()?, config))
    }
}
