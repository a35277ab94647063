//! Deterministic identifiers
//!
//! `participant(1)` sorts before `participant(2)` and so on, which keeps
//! id tie-breaks in the turn order predictable.

use baton_core::{ParticipantId, SessionId};
use uuid::Uuid;

/// Participant with a small fixed id
pub fn participant(n: u128) -> ParticipantId {
    ParticipantId::from_uuid(Uuid::from_u128(n))
}

/// Session with a small fixed id
pub fn session(n: u128) -> SessionId {
    SessionId::from_uuid(Uuid::from_u128(n))
}
