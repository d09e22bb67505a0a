//! Checkpoints: periodic snapshots of the running hash that let a verifier
//! sample a long chain instead of replaying every event.
//!
//! A checkpoint is emitted after every `checkpoint_interval` events. It
//! carries nothing a full replay couldn't reproduce; its only purpose is
//! to give `verify::verify_sampled` segment boundaries to jump between.

use serde::{Deserialize, Serialize};

/// The interval resolved for every chain in this crate (see `SPEC_FULL.md`
/// open question 1). Not `pub(crate)`: `metadata.checkpointInterval` in an
/// exported envelope must always read back this value, and external tools
/// reading that field need the same constant to sanity-check it.
pub const CHECKPOINT_INTERVAL: u64 = 50;

/// A periodic snapshot of the chain's running hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Sequence number of the last event covered by this checkpoint.
    pub sequence: u64,
    /// That event's `hash`.
    pub hash: String,
    pub timestamp: u64,
    /// SHA-256 of the tracked document's live buffer at this point, supplied
    /// by the external editor. The chain never reads document content
    /// itself, so this is `None` whenever the caller doesn't hand one in.
    pub content_hash: Option<String>,
}

/// Whether recording the event at `sequence` should emit a checkpoint,
/// given `interval` events per checkpoint. Checkpoints land after events
/// `interval - 1`, `2 * interval - 1`, … (0-based sequence numbers).
pub fn is_checkpoint_boundary(sequence: u64, interval: u64) -> bool {
    interval != 0 && (sequence + 1) % interval == 0
}
