//! Reliability score derived from turn-taking counters

use crate::types::ReliabilityRecord;

/// Points deducted per watchdog timeout
pub const TIMEOUT_PENALTY: f64 = 10.0;

/// Score in `0..=100`, or `None` until the participant was assigned a turn
///
/// `round(100 * taken / max(1, assigned) - 10 * timeouts)`, clamped.
pub fn reliability_score(assigned: u64, taken: u64, timeouts: u64) -> Option<u8> {
    if assigned == 0 {
        return None;
    }
    let ratio = 100.0 * taken as f64 / assigned.max(1) as f64;
    let raw = (ratio - TIMEOUT_PENALTY * timeouts as f64).round();
    Some(raw.clamp(0.0, 100.0) as u8)
}

/// Score of a stored record
pub fn score_record(record: &ReliabilityRecord) -> Option<u8> {
    reliability_score(
        record.turns_assigned,
        record.turns_taken,
        record.watchdog_timeouts,
    )
}
