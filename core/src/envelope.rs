//! JSON export/import envelopes.
//!
//! Two shapes: `SingleFileEnvelope` is one tab's complete, self-verifiable
//! proof — everything `verify::verify_full` needs, plus the summary fields
//! (`typingProofData`, `proof`, `metadata`) a reviewer reads without
//! replaying the chain. `MultiTabStorage` bundles several tabs that share
//! one editing session (and one device fingerprint) into a single
//! document, the way a multi-tab export groups per-tab proofs without
//! needing a shared top-level chain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chain::ChainSnapshot;
use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::fingerprint::DeviceFingerprint;
use crate::hash::{det_json, sha256_hex};

pub const SINGLE_FILE_VERSION: &str = "1.0.0";
pub const MULTI_TAB_VERSION: &str = "2.0.0";

/// Literal `type` discriminant carried on every `MultiTabStorage` export.
pub const MULTI_FILE_TYPE: &str = "multi-file";

/// Per-event-type counters summarizing a chain's events, surfaced in
/// `typingProofData.metadata` so a reviewer doesn't have to scan `events`
/// by hand to answer "was any of this pasted in".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetadata {
    pub total_events: u64,
    pub paste_events: u64,
    pub drop_events: u64,
    pub insert_events: u64,
    pub delete_events: u64,
    /// Milliseconds between the first and last event's timestamps.
    pub total_typing_time: u64,
    /// Inserted/deleted keystroke-ish events per minute of `totalTypingTime`.
    /// Zero when there isn't enough of a time span to divide by.
    pub average_typing_speed: f64,
}

fn scan_metadata(events: &[Event]) -> ProofMetadata {
    let total_events = events.len() as u64;
    let mut paste_events = 0u64;
    let mut drop_events = 0u64;
    let mut insert_events = 0u64;
    let mut delete_events = 0u64;

    for event in events {
        match event.core.input_type.as_deref() {
            Some("insertFromPaste") => paste_events += 1,
            Some("insertFromDrop") => drop_events += 1,
            Some(t) if t.starts_with("insert") => insert_events += 1,
            Some(t) if t.starts_with("delete") => delete_events += 1,
            _ => {}
        }
    }

    let total_typing_time = match (events.first(), events.last()) {
        (Some(first), Some(last)) => last.core.timestamp.saturating_sub(first.core.timestamp),
        _ => 0,
    };

    let keystroke_events = (insert_events + delete_events) as f64;
    let average_typing_speed = if total_typing_time > 0 {
        keystroke_events / (total_typing_time as f64 / 60_000.0)
    } else {
        0.0
    };

    ProofMetadata {
        total_events,
        paste_events,
        drop_events,
        insert_events,
        delete_events,
        total_typing_time,
        average_typing_speed,
    }
}

/// Summary fields a reviewer reads to decide whether a chain looks like
/// pasted content before bothering to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingProofData {
    pub final_content_hash: String,
    pub final_event_chain_hash: String,
    pub device_id: String,
    pub metadata: ProofMetadata,
}

/// The full event chain plus a signature over its summary, independent of
/// the per-event PoSW chain that `verify::verify_full` checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProof {
    pub total_events: u64,
    pub final_hash: String,
    pub start_time: u64,
    pub end_time: u64,
    /// `sha256(det_json({totalEvents, finalHash, startTime, endTime, events}))`,
    /// not a cryptographic signature in the asymmetric-key sense — there is
    /// no signing key in this crate's trust model, only a tamper-evidence
    /// digest a verifier can recompute.
    pub signature: String,
    pub events: Vec<Event>,
}

#[derive(Serialize)]
struct SignaturePayload<'a> {
    total_events: u64,
    final_hash: &'a str,
    start_time: u64,
    end_time: u64,
    events: &'a [Event],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub user_agent: String,
    pub timestamp: u64,
    pub is_pure_typing: bool,
    /// Not in the distilled export schema, but every exported envelope
    /// must read back the interval it was checkpointed at (see
    /// `SPEC_FULL.md` open question 1), and this is the metadata bag that
    /// travels with the chain — so it lives here rather than inventing a
    /// second metadata object.
    pub checkpoint_interval: u64,
}

/// One tab's complete, independently verifiable proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleFileEnvelope {
    pub version: String,
    pub typing_proof_hash: String,
    pub typing_proof_data: TypingProofData,
    pub proof: ChainProof,
    pub fingerprint: DeviceFingerprint,
    pub metadata: ExportMetadata,
    /// Not part of the literal export schema: `verify::verify_full` and
    /// `HashChain::restore` both need the chain's seed hash, and for an
    /// empty chain it can't be recovered from `events[0].previousHash`
    /// (there is no event 0). Carried as an explicit field instead, the
    /// way an unknown-but-harmless field would be per the round-trip
    /// invariant — any verifier that ignores it can still fall back to
    /// `events[0].previousHash` when `events` is non-empty.
    pub initial_hash: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl SingleFileEnvelope {
    /// Build an envelope from a chain snapshot.
    ///
    /// `final_content_hash` is supplied by the caller (typically
    /// `sha256_hex` of the tracked document's current buffer), the same
    /// way `Checkpoint.contentHash` would be: the engine never reads the
    /// document itself, only the events describing edits to it. Pass
    /// `None` when the caller has no buffer to hash (e.g. a daemon
    /// exporting a tab it never saw the contents of); the hash of the
    /// empty string signals that honestly rather than faking one.
    pub fn from_snapshot(
        snapshot: &ChainSnapshot,
        exported_at: u64,
        user_agent: &str,
        final_content_hash: Option<&str>,
    ) -> Result<Self> {
        let events = snapshot.events.clone();
        let metadata = scan_metadata(&events);

        let final_hash = events
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| snapshot.initial_hash.clone());
        let start_time = events.first().map(|e| e.core.timestamp).unwrap_or(0);
        let end_time = events.last().map(|e| e.core.timestamp).unwrap_or(start_time);
        let total_events = events.len() as u64;

        let signature = sha256_hex(
            det_json(&SignaturePayload {
                total_events,
                final_hash: &final_hash,
                start_time,
                end_time,
                events: &events,
            })?
            .as_bytes(),
        );

        let typing_proof_data = TypingProofData {
            final_content_hash: final_content_hash
                .map(str::to_string)
                .unwrap_or_else(|| sha256_hex(b"")),
            final_event_chain_hash: final_hash.clone(),
            device_id: snapshot.device_fingerprint.hash.clone(),
            metadata: metadata.clone(),
        };
        let typing_proof_hash = sha256_hex(det_json(&typing_proof_data)?.as_bytes());
        let is_pure_typing = metadata.paste_events == 0 && metadata.drop_events == 0;

        Ok(Self {
            version: SINGLE_FILE_VERSION.to_string(),
            typing_proof_hash,
            typing_proof_data,
            proof: ChainProof {
                total_events,
                final_hash,
                start_time,
                end_time,
                signature,
                events,
            },
            fingerprint: snapshot.device_fingerprint.clone(),
            metadata: ExportMetadata {
                user_agent: user_agent.to_string(),
                timestamp: exported_at,
                is_pure_typing,
                checkpoint_interval: snapshot.checkpoint_interval,
            },
            initial_hash: snapshot.initial_hash.clone(),
            checkpoints: snapshot.checkpoints.clone(),
        })
    }

    pub fn to_snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            device_fingerprint: self.fingerprint.clone(),
            initial_hash: self.initial_hash.clone(),
            start_time: self.proof.start_time,
            checkpoint_interval: self.metadata.checkpoint_interval,
            events: self.proof.events.clone(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::Serialization)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(text).map_err(Error::Serialization)?;
        if envelope.version != SINGLE_FILE_VERSION {
            return Err(Error::UnsupportedVersion(envelope.version.clone()));
        }
        Ok(envelope)
    }
}

/// One tab's envelope, tagged with the tab identifier and the filename it
/// was exported under (after collision resolution — see
/// `MultiTabStorage::new`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabEnvelope {
    pub tab_id: String,
    pub filename: String,
    pub envelope: SingleFileEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiTabMetadata {
    pub total_files: usize,
    /// `true` only if every bundled tab's `metadata.isPureTyping` is true.
    pub overall_pure_typing: bool,
}

/// A logged switch between tabs, carried verbatim from
/// `tabs::TabSwitchEvent` into the export so an offline reviewer can see
/// the order a human moved between files without replaying every chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSwitchEntry {
    pub timestamp: u64,
    pub from_tab_id: Option<String>,
    pub to_tab_id: String,
    pub from_filename: Option<String>,
    pub to_filename: Option<String>,
}

/// Several tabs from one multi-tab session, bundled in one document.
///
/// `files` is a plain ordered list rather than a JSON object keyed by tab
/// id: `serde_json::Value`'s map type sorts keys lexicographically unless
/// the `preserve_order` feature is enabled (it isn't — `hash.rs` relies on
/// that for `det_json`), so a JSON object here would silently reorder tabs
/// on every reserialization. A list's order is the insertion order for
/// free, which is exactly what resolves the distilled spec's open
/// question about tab ordering without adding an explicit `tabOrder`
/// field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiTabStorage {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub files: Vec<TabEnvelope>,
    pub metadata: MultiTabMetadata,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tab_switches: Vec<TabSwitchEntry>,
}

impl MultiTabStorage {
    /// Build a bundle from `(tab_id, filename, envelope)` triples,
    /// resolving filename collisions deterministically: the first tab to
    /// claim a filename keeps it, every later tab with the same filename
    /// gets `_1`, `_2`, … spliced in before the extension, in iteration
    /// order.
    pub fn new(entries: Vec<(String, String, SingleFileEnvelope)>) -> Self {
        Self::with_tab_switches(entries, Vec::new())
    }

    pub fn with_tab_switches(
        entries: Vec<(String, String, SingleFileEnvelope)>,
        tab_switches: Vec<TabSwitchEntry>,
    ) -> Self {
        let mut seen: HashMap<String, u32> = HashMap::new();
        let mut files = Vec::with_capacity(entries.len());
        let mut overall_pure_typing = true;

        for (tab_id, filename, envelope) in entries {
            let resolved = resolve_filename_collision(&filename, &mut seen);
            overall_pure_typing &= envelope.metadata.is_pure_typing;
            files.push(TabEnvelope { tab_id, filename: resolved, envelope });
        }

        let total_files = files.len();
        Self {
            version: MULTI_TAB_VERSION.to_string(),
            kind: MULTI_FILE_TYPE.to_string(),
            files,
            metadata: MultiTabMetadata { total_files, overall_pure_typing },
            tab_switches,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::Serialization)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(Error::Serialization)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::MissingField("version".to_string()))?;

        if version.starts_with("1.") {
            return Err(Error::UnsupportedVersion(version.to_string()));
        }
        if version != MULTI_TAB_VERSION {
            return Err(Error::UnsupportedVersion(version.to_string()));
        }

        serde_json::from_value(value).map_err(Error::Serialization)
    }

    pub fn tab_ids(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.tab_id.as_str()).collect()
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.filename.as_str()).collect()
    }
}

fn resolve_filename_collision(filename: &str, seen: &mut HashMap<String, u32>) -> String {
    let count = seen.entry(filename.to_string()).or_insert(0);
    if *count == 0 {
        *count += 1;
        filename.to_string()
    } else {
        let suffixed = suffix_before_extension(filename, *count);
        *count += 1;
        suffixed
    }
}

fn suffix_before_extension(filename: &str, n: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{n}.{ext}"),
        None => format!("{filename}_{n}"),
    }
}
