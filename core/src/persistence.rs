//! Session persistence contract.
//!
//! This crate never picks a storage engine for itself — `chain.rs`'s
//! `ChainSnapshot` is already a plain serializable value, and
//! `HashChain::set_append_event_hook` already gives a host a place to
//! plug in incremental durability. `ChainStore` is the minimal trait a
//! host (the daemon's `rusqlite` layer, a flat-file dev harness, an
//! in-memory test double) implements to satisfy both: full
//! snapshot save/restore across process restarts, plus an append-only
//! feed of individual events so a crash between snapshots loses at most
//! the events the hook hasn't been called for yet.

use std::sync::Arc;

use tracing::warn;

use crate::chain::{ChainSnapshot, HashChain};
use crate::error::Result;
use crate::event::Event;

/// Storage contract a host implements to persist chains across restarts.
pub trait ChainStore: Send + Sync {
    fn save_snapshot(&self, tab_id: &str, snapshot: &ChainSnapshot) -> Result<()>;
    fn load_snapshot(&self, tab_id: &str) -> Result<Option<ChainSnapshot>>;
    fn append_event(&self, tab_id: &str, event: &Event) -> Result<()>;
}

/// Wire a chain's `append_event_hook` to `store`, so every recorded event
/// is durably appended as it happens rather than only at the next full
/// snapshot. Persistence failures are logged, not propagated — a record
/// the in-memory chain already accepted must not retroactively fail the
/// caller of `record_event`; the host is expected to notice repeated
/// warnings and degrade (e.g. reject new writes) on its own terms.
pub fn attach_store(chain: &HashChain, store: Arc<dyn ChainStore>, tab_id: String) {
    chain.set_append_event_hook(Arc::new(move |event: &Event| {
        if let Err(err) = store.append_event(&tab_id, event) {
            warn!(tab_id = %tab_id, sequence = event.core.sequence, error = %err, "failed to persist event");
        }
    }));
}

/// Restore a chain from `store`, if a snapshot for `tab_id` exists.
pub fn restore_chain(store: &dyn ChainStore, tab_id: &str) -> Result<Option<HashChain>> {
    Ok(store.load_snapshot(tab_id)?.map(HashChain::restore))
}
