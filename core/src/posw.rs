//! Proof of Sequential Work.
//!
//! A PoSW is iterated SHA-256 whose wall-clock cost lower-bounds the work
//! behind a single event: the chain of hashes inside one event cannot be
//! parallelized, so a forger has to pay `POSW_ITERATIONS` hash evaluations
//! per event no matter how much hardware they throw at it. Separate events
//! may still compute concurrently (see `chain.rs` for the writer lock that
//! keeps them ordered even so).

use std::time::{Duration, Instant};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical iteration count. Part of the wire format: changing it is a
/// breaking envelope version bump (see `envelope.rs`).
pub const POSW_ITERATIONS: u32 = 10_000;

/// Reference wall-clock timeout for a single PoSW computation.
pub const POSW_TIMEOUT: Duration = Duration::from_secs(30);

/// A completed Proof of Sequential Work for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Posw {
    pub iterations: u32,
    /// 128-bit nonce, hex-encoded (32 hex chars).
    pub nonce: String,
    /// Final intermediate hash after `iterations` sequential SHA-256 rounds.
    pub intermediate_hash: String,
    pub compute_time_ms: u32,
}

fn iterate(seed_hex_input: &[u8], iterations: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed_hex_input);
    let mut current: [u8; 32] = hasher.finalize().into();

    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(current);
        current = hasher.finalize().into();
    }

    hex::encode(current)
}

fn seed(previous_hash: &str, event_data_str: &str, nonce_hex: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(event_data_str.as_bytes());
    hasher.update(nonce_hex.as_bytes());
    hasher.finalize().to_vec()
}

/// Generate a fresh 128-bit nonce and compute its PoSW.
///
/// Deterministic given `previous_hash`, `event_data_str`, and the nonce;
/// the nonce itself is the only randomized input, which is why it travels
/// with the proof instead of being re-derived at verify time.
pub fn compute(previous_hash: &str, event_data_str: &str) -> Posw {
    let mut nonce_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = hex::encode(nonce_bytes);

    let started = Instant::now();
    let seed_bytes = seed(previous_hash, event_data_str, &nonce);
    let intermediate_hash = iterate(&seed_bytes, POSW_ITERATIONS);
    let compute_time_ms = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;

    Posw {
        iterations: POSW_ITERATIONS,
        nonce,
        intermediate_hash,
        compute_time_ms,
    }
}

/// Re-run the iterated hash with the proof's own nonce and iteration count,
/// and compare against the claimed `intermediate_hash`.
pub fn verify(previous_hash: &str, event_data_str: &str, posw: &Posw) -> bool {
    let seed_bytes = seed(previous_hash, event_data_str, &posw.nonce);
    let recomputed = iterate(&seed_bytes, posw.iterations);
    recomputed == posw.intermediate_hash
}
