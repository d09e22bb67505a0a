//! IPC message and response types shared between the daemon, CLI, and hook.
//!
//! Messages are serialized as one JSON line per message/response, the same
//! externally-tagged `{"type": ..., "payload": ...}` shape used throughout
//! this crate's wire formats.

use serde::{Deserialize, Serialize};

use crate::envelope::{MultiTabStorage, SingleFileEnvelope};
use crate::event::{Attestation, Event, EventInput};
use crate::fingerprint::FingerprintComponents;

/// Message sent from a CLI/hook client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcMessage {
    /// Establish the shared device fingerprint for this daemon's tab
    /// session. Idempotent: once a session is open, later calls are
    /// accepted but their `components` are ignored, so a second editor
    /// window attaching to an already-running daemon doesn't fork the
    /// fingerprint mid-session.
    OpenSession {
        components: FingerprintComponents,
        checkpoint_interval: Option<u64>,
    },

    /// Record a regular tracked event on a tab, opening the tab if it
    /// isn't already open.
    RecordEvent { tab_id: String, input: EventInput },

    /// Record a human attestation on a tab. The daemon decides whether
    /// this becomes a `HumanAttestation` (the tab's first event) or a
    /// `PreExportAttestation` (recorded on a tab that already has
    /// events), since only the daemon knows the tab's current length.
    RecordAttestation { tab_id: String, attestation: Attestation },

    /// Aggregate stats across every open tab.
    Stats,

    /// Export one tab's complete proof.
    ExportTab { tab_id: String },

    /// Export every open tab as a `MultiTabStorage` bundle.
    ExportBundle,

    /// Create a tab with tracked filename/language, opening its chain.
    /// `skip_attestation` is for bulk template import, where no human is
    /// present to attest per file.
    CreateTab { tab_id: String, filename: String, language: String, skip_attestation: bool },

    RenameTab { tab_id: String, filename: String },

    SetLanguage { tab_id: String, language: String },

    /// Record a switch to `tab_id`, logging where the switch came from.
    SwitchTab { tab_id: String },

    /// Force an immediate snapshot flush to the persistence store.
    Snapshot,

    Ping,
    Shutdown,

    /// Run store maintenance (vacuum, prune events older than
    /// `retention_days`; `0` disables pruning).
    Maintenance { retention_days: u32 },
}

/// Per-tab summary returned by `IpcMessage::Stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabStats {
    pub tab_id: String,
    pub events_recorded: u64,
    /// `record_event` calls currently in flight for this tab, not yet
    /// appended to the chain.
    pub queued: u64,
    pub checkpoints: u64,
    pub last_hash: String,
    pub elapsed_ms: u64,
    /// Count of recorded events keyed by `EventType::as_str`.
    pub events_by_type: std::collections::BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStats {
    pub uptime_secs: u64,
    pub device_fingerprint_hash: String,
    pub tabs: Vec<TabStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceStats {
    pub events_pruned: u64,
    pub duration_ms: u64,
}

/// Response sent back from the daemon to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcResponse {
    Ok,
    Error(String),
    Event(Event),
    Envelope(SingleFileEnvelope),
    Bundle(MultiTabStorage),
    Stats(DaemonStats),
    Pong { uptime_secs: u64, tabs: u64 },
    Maintenance(MaintenanceStats),
}
