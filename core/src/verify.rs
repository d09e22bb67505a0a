//! Chain verification: full replay and checkpoint-sampled replay.
//!
//! Both verifiers run the same six-step per-event check (sequence,
//! timestamp monotonicity, previous-hash link, PoSW re-verification, hash
//! re-derivation) over a contiguous run of events; `verify_full` runs it
//! over the whole chain, `verify_sampled` runs it over a random subset of
//! the segments checkpoints carved the chain into, trusting the
//! checkpoint hashes to vouch for the segments it skips.

use rand::seq::SliceRandom;

use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::hash::det_json;
use crate::posw;

/// Summary of what a verification pass actually checked, so a caller (the
/// CLI, the daemon's `Stats` handler) can report coverage honestly instead
/// of implying every event was checked when only a sample was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub events_checked: u64,
    pub total_events: u64,
    pub segments_checked: usize,
    pub total_segments: usize,
}

impl VerifyReport {
    pub fn is_exhaustive(&self) -> bool {
        self.events_checked == self.total_events
    }
}

/// Replay every event in the chain and confirm it links correctly to its
/// predecessor and re-derives its own proof and hash.
pub fn verify_full(initial_hash: &str, events: &[Event]) -> Result<VerifyReport> {
    verify_range(initial_hash, events, 0, events.len())?;
    Ok(VerifyReport {
        events_checked: events.len() as u64,
        total_events: events.len() as u64,
        segments_checked: 1,
        total_segments: 1,
    })
}

/// Verify a chain by checking checkpoint hash continuity for every
/// checkpoint (cheap) and fully replaying `sample_count` randomly chosen
/// segments between checkpoints (expensive: each event's PoSW costs
/// `POSW_ITERATIONS` hash evaluations to re-verify).
///
/// The first and last segments are always included regardless of
/// `sample_count`, so tampering near either end of the chain is never
/// missed by sampling alone. `sample_count` is otherwise clamped to the
/// number of segments the chain actually has; passing a number at least
/// as large as the segment count makes this equivalent to `verify_full`.
pub fn verify_sampled(
    initial_hash: &str,
    events: &[Event],
    checkpoints: &[Checkpoint],
    sample_count: usize,
) -> Result<VerifyReport> {
    for checkpoint in checkpoints {
        let event = events
            .get(checkpoint.sequence as usize)
            .ok_or(Error::SegmentEndMismatch(checkpoint.sequence))?;
        if event.hash != checkpoint.hash {
            return Err(Error::SegmentEndMismatch(checkpoint.sequence));
        }
    }

    let segments = segment_bounds(checkpoints, events.len());
    if segments.is_empty() {
        return Ok(VerifyReport {
            events_checked: 0,
            total_events: events.len() as u64,
            segments_checked: 0,
            total_segments: 0,
        });
    }

    // Always check the first and last segments; sample the remainder
    // without replacement until `sample_count` segments are covered.
    let total_segments = segments.len();
    let forced = if total_segments >= 2 { 2 } else { 1 };
    let chosen_count = sample_count.max(forced).min(total_segments);

    let mut chosen_indices = vec![0usize];
    if total_segments >= 2 {
        chosen_indices.push(total_segments - 1);
    }
    if chosen_count > chosen_indices.len() {
        let mut remainder: Vec<usize> = (1..total_segments.saturating_sub(1)).collect();
        remainder.shuffle(&mut rand::thread_rng());
        let need = chosen_count - chosen_indices.len();
        chosen_indices.extend(remainder.into_iter().take(need));
    }
    chosen_indices.sort_unstable();
    chosen_indices.dedup();

    let mut events_checked = 0u64;
    for &seg_idx in &chosen_indices {
        let (start, end) = segments[seg_idx];
        verify_range(initial_hash, events, start, end)?;
        events_checked += (end - start) as u64;
    }

    Ok(VerifyReport {
        events_checked,
        total_events: events.len() as u64,
        segments_checked: chosen_indices.len(),
        total_segments,
    })
}

/// Carve `[0, total_events)` into the half-open ranges checkpoints imply:
/// one range per checkpoint, plus a trailing range for any events recorded
/// after the last checkpoint.
fn segment_bounds(checkpoints: &[Checkpoint], total_events: usize) -> Vec<(usize, usize)> {
    let mut bounds = Vec::with_capacity(checkpoints.len() + 1);
    let mut start = 0usize;
    for checkpoint in checkpoints {
        let end = checkpoint.sequence as usize + 1;
        if end > start {
            bounds.push((start, end));
        }
        start = end;
    }
    if total_events > start {
        bounds.push((start, total_events));
    }
    bounds
}

fn verify_range(initial_hash: &str, events: &[Event], start: usize, end: usize) -> Result<()> {
    let mut previous_hash = if start == 0 {
        initial_hash.to_string()
    } else {
        events[start - 1].hash.clone()
    };
    let mut previous_timestamp = if start == 0 { 0 } else { events[start - 1].core.timestamp };

    for idx in start..end {
        let event = &events[idx];

        if event.core.sequence != idx as u64 {
            return Err(Error::SequenceMismatch {
                expected: idx as u64,
                found: event.core.sequence,
            });
        }

        if event.core.timestamp < previous_timestamp {
            return Err(Error::TimestampViolation {
                previous: previous_timestamp,
                current: event.core.timestamp,
            });
        }

        if event.core.previous_hash != previous_hash {
            return Err(Error::PreviousHashMismatch(event.core.sequence));
        }

        let event_data_str = det_json(&event.core)?;
        if !posw::verify(&event.core.previous_hash, &event_data_str, &event.posw) {
            return Err(Error::PoswVerifyFailed(event.core.sequence));
        }

        let computed = event.derive_hash()?;
        if computed != event.hash {
            return Err(Error::HashMismatch {
                index: event.core.sequence,
                expected: event.hash.clone(),
                computed,
            });
        }

        previous_hash = event.hash.clone();
        previous_timestamp = event.core.timestamp;
    }

    Ok(())
}
