//! Deterministic turn order
//!
//! Pure functions over membership rows. The order is total:
//! 1. privileged before standard,
//! 2. ascending join time, members without a join time after those with one,
//! 3. ascending participant id (lexicographic on the UUID text form).
//!
//! Rule 3 is what keeps two resolvers on different workers agreeing when join
//! timestamps collide or are missing.

use crate::identifiers::ParticipantId;
use crate::time::PhysicalTime;
use crate::types::{Membership, Role};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The fields of a membership that take part in ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCandidate {
    /// Participant
    pub id: ParticipantId,
    /// Role
    pub role: Role,
    /// Join time, if known
    pub joined_at: Option<PhysicalTime>,
    /// Excluded from the active order when set
    pub inactive: bool,
}

impl From<&Membership> for OrderCandidate {
    fn from(member: &Membership) -> Self {
        Self {
            id: member.participant_id,
            role: member.role,
            joined_at: member.joined_at,
            inactive: member.inactive,
        }
    }
}

/// Total order between two candidates
pub fn compare(a: &OrderCandidate, b: &OrderCandidate) -> Ordering {
    a.role
        .rank()
        .cmp(&b.role.rank())
        .then_with(|| compare_joined(a.joined_at, b.joined_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn compare_joined(a: Option<PhysicalTime>, b: Option<PhysicalTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Turn order over `candidates`
pub fn resolve_order(candidates: &[OrderCandidate], include_inactive: bool) -> Vec<ParticipantId> {
    let mut ordered: Vec<&OrderCandidate> = candidates
        .iter()
        .filter(|c| include_inactive || !c.inactive)
        .collect();
    ordered.sort_by(|a, b| compare(a, b));
    ordered.into_iter().map(|c| c.id).collect()
}

/// Turn order over membership rows
pub fn resolve_member_order(members: &[Membership], include_inactive: bool) -> Vec<ParticipantId> {
    let candidates: Vec<OrderCandidate> = members.iter().map(OrderCandidate::from).collect();
    resolve_order(&candidates, include_inactive)
}

/// Participant that follows `current` in the active order
///
/// Walks the full order (inactive members included) from `current`'s slot so
/// a holder who just went inactive or is leaving still hands the turn to the
/// member seated after them. With one active member the turn loops back to
/// that member. With no active member at all the privileged participant
/// holds the turn.
pub fn next_holder(
    candidates: &[OrderCandidate],
    current: ParticipantId,
    privileged: ParticipantId,
) -> ParticipantId {
    let mut full: Vec<&OrderCandidate> = candidates.iter().collect();
    full.sort_by(|a, b| compare(a, b));

    if full.iter().all(|c| c.inactive) {
        return privileged;
    }

    let start = full.iter().position(|c| c.id == current);
    let len = full.len();
    let offset = start.map_or(0, |idx| idx + 1);

    (0..len)
        .map(|step| full[(offset + step) % len])
        .find(|c| !c.inactive)
        .map_or(privileged, |c| c.id)
}

/// Encode a holder for storage: the privileged participant becomes `None`
pub fn holder_slot(next: ParticipantId, privileged: ParticipantId) -> Option<ParticipantId> {
    (next != privileged).then_some(next)
}
