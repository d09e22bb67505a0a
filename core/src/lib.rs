//! Typedcode Core - the hash-chain Proof of Sequential Work engine.
//!
//! This crate provides:
//! - The chain primitives (`hash`, `posw`, `checkpoint`) that make an
//!   event chain tamper-evident and its cost-to-forge bounded
//! - The event data model and the single-writer `HashChain` that records
//!   and links events
//! - Full and checkpoint-sampled verification
//! - Device fingerprinting for chain-seed derivation
//! - Multi-tab coordination over one shared fingerprint
//! - JSON export/import envelopes and the ZIP archive format that bundles
//!   per-tab proofs with their screenshots
//! - A storage contract for host-side persistence, decoupled from any
//!   particular engine
//! - The IPC message/response types and synchronous client shared by the
//!   daemon, CLI, and hook

pub mod archive;
pub mod chain;
pub mod checkpoint;
pub mod envelope;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod hash;
pub mod ipc;
pub mod persistence;
pub mod posw;
pub mod tabs;
pub mod types;
pub mod verify;

pub use chain::{ChainSnapshot, HashChain, PoswBackend};
pub use error::Error;
pub use event::{Event, EventCore, EventData, EventInput, EventType};
pub use fingerprint::{DeviceFingerprint, FingerprintComponents};
pub use ipc::{is_daemon_running, IpcClient, IpcError};
pub use tabs::{TabCoordinator, TabState, TabSwitchEvent, VerificationState};
pub use types::{IpcMessage, IpcResponse};
pub use verify::{verify_full, verify_sampled, VerifyReport};

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::chain::{ChainSnapshot, HashChain, PoswBackend};
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, EventCore, EventData, EventInput, EventType};
    pub use crate::fingerprint::{DeviceFingerprint, FingerprintComponents};
    pub use crate::ipc::{is_daemon_running, IpcClient, IpcError};
    pub use crate::tabs::{TabCoordinator, TabState, TabSwitchEvent, VerificationState};
    pub use crate::types::{IpcMessage, IpcResponse};
    pub use crate::verify::{verify_full, verify_sampled, VerifyReport};
}
