//! Event data model.
//!
//! An event is the atomic unit the hash chain links: one user action (a
//! keystroke batch, a cursor move, a human attestation, …) plus the PoSW
//! that proves it was produced in sequence after the previous one. `Event`
//! is the on-wire, fully-proved record; `EventInput` is what a tracker
//! hands to `HashChain::record_event` before sequencing, timestamping, and
//! PoSW are filled in.

use serde::{Deserialize, Serialize};

use crate::posw::Posw;

/// The kind of user or system action an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    ContentChange,
    CursorMove,
    KeyDown,
    KeyUp,
    Visibility,
    Focus,
    WindowResize,
    NetworkStatus,
    HumanAttestation,
    PreExportAttestation,
    TemplateInjection,
    ScreenshotCapture,
    ScreenShareStart,
    ScreenShareStop,
    ScreenShareOptOut,
    CodeExecution,
    TerminalInput,
    SessionResumed,
    TermsAccepted,
}

impl EventType {
    /// Whether this event type is permitted to open a chain (event 0).
    ///
    /// Every chain must be able to prove the human behind it consented
    /// before anything else happened, so only an attestation may come first.
    pub fn may_open_chain(self) -> bool {
        matches!(self, EventType::HumanAttestation)
    }

    /// The wire-format label for this variant, matching its camelCase serde
    /// rendering. Used where a type needs to key on an event type outside
    /// of serde itself, e.g. per-type stats tallies.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ContentChange => "contentChange",
            EventType::CursorMove => "cursorMove",
            EventType::KeyDown => "keyDown",
            EventType::KeyUp => "keyUp",
            EventType::Visibility => "visibility",
            EventType::Focus => "focus",
            EventType::WindowResize => "windowResize",
            EventType::NetworkStatus => "networkStatus",
            EventType::HumanAttestation => "humanAttestation",
            EventType::PreExportAttestation => "preExportAttestation",
            EventType::TemplateInjection => "templateInjection",
            EventType::ScreenshotCapture => "screenshotCapture",
            EventType::ScreenShareStart => "screenShareStart",
            EventType::ScreenShareStop => "screenShareStop",
            EventType::ScreenShareOptOut => "screenShareOptOut",
            EventType::CodeExecution => "codeExecution",
            EventType::TerminalInput => "terminalInput",
            EventType::SessionResumed => "sessionResumed",
            EventType::TermsAccepted => "termsAccepted",
        }
    }
}

/// A line/column position inside the tracked document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A `[start, end)` range expressed as positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRange {
    pub start: Position,
    pub end: Position,
}

/// Geometry of the surface a screenshot or screen-share was captured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
    pub display_surface: Option<String>,
}

/// A signed claim that a human operator was present at a point in time.
///
/// Carried by `HumanAttestation` and `PreExportAttestation` events. The
/// `signature` is opaque to this crate: it is whatever the attesting agent
/// (a WebAuthn assertion, an external notary call, …) produced, and is
/// hashed as part of the event like any other payload rather than verified
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub verified: bool,
    pub score: f64,
    pub action: String,
    pub timestamp: String,
    pub hostname: String,
    pub signature: String,
    pub success: bool,
}

/// Per-keystroke timing, used by `KeyDown`/`KeyUp` events to support
/// downstream cadence analysis. Purely descriptive: the chain never judges
/// whether a cadence "looks human".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystrokeDynamics {
    pub key: String,
    pub dwell_ms: Option<u32>,
    pub flight_ms: Option<u32>,
}

/// The event-specific payload. Tagged by `kind` in the wire format so a
/// verifier can recover strongly-typed payloads for the shapes it knows
/// about and fall back to `Raw` for everything else (new event kinds added
/// by a newer tracker still serialize, hash, and verify correctly even
/// against an older verifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventData {
    Text { value: String },
    Cursor { position: Position },
    Range { range: PositionRange },
    Mouse { x: f64, y: f64 },
    Keystroke(KeystrokeDynamics),
    WindowSize { width: u32, height: u32 },
    Visibility { state: String },
    Network { online: bool },
    Attestation(Attestation),
    Screenshot { capture_type: String, display: Option<DisplayInfo> },
    CodeExecution {
        exit_code: Option<i32>,
        stdout: Option<String>,
        stderr: Option<String>,
    },
    /// Catch-all for event kinds with no structured payload (focus,
    /// template-injection markers, terms-accepted, …) or for forward
    /// compatibility with payload shapes this crate doesn't model yet.
    Raw(serde_json::Value),
}

/// Everything about an event except the proof fields (`posw`, `hash`).
/// This is the shape that gets canonically encoded and fed into PoSW, and
/// the shape a tracker builds incrementally before the chain stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCore {
    pub sequence: u64,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub input_type: Option<String>,
    pub data: EventData,
    pub range_offset: Option<u32>,
    pub range_length: Option<u32>,
    pub range: Option<PositionRange>,
    pub description: Option<String>,
    /// Hash of the event immediately before this one. Always set, even for
    /// event 0, whose `previous_hash` equals the chain's `initial_hash`
    /// (the fingerprint-derived seed) rather than being null — see
    /// `HashChain::initial_hash`.
    pub previous_hash: String,
}

/// What a tracker supplies when asking the chain to record a new event.
/// The chain fills in `sequence`, `timestamp`, and `previous_hash` itself
/// so two trackers can never race to pick them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub event_type: EventType,
    pub input_type: Option<String>,
    pub data: EventData,
    pub range_offset: Option<u32>,
    pub range_length: Option<u32>,
    pub range: Option<PositionRange>,
    pub description: Option<String>,
    /// SHA-256 of the tracked document's live buffer, as of this event.
    /// Only consulted when this event lands on a checkpoint boundary; the
    /// chain never reads document content, so a tracker that never supplies
    /// one simply gets checkpoints with `content_hash: None`.
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// `EventCore` plus its `posw`, but not yet its final `hash`. This is the
/// shape PoSW's seed is computed over isn't this — PoSW seeds off
/// `det_json(&EventCore)` alone — but the event's final `hash` is computed
/// over this shape, so that the proof itself is tamper-evident too.
#[derive(Serialize)]
pub(crate) struct EventCoreWithPosw<'a> {
    #[serde(flatten)]
    pub core: &'a EventCore,
    pub posw: &'a Posw,
}

/// A fully-proved, chain-linked event: the complete on-wire record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub core: EventCore,
    pub posw: Posw,
    pub hash: String,
}

impl Event {
    /// Re-derive `det_json(&EventCoreWithPosw)`, the payload that gets
    /// concatenated onto `previousHash` to produce `self.hash`. Exposed so
    /// `verify.rs` can recompute the hash without duplicating the encoding
    /// rule.
    pub fn core_with_posw_json(&self) -> crate::error::Result<String> {
        crate::hash::det_json(&EventCoreWithPosw {
            core: &self.core,
            posw: &self.posw,
        })
    }

    /// Re-derive the event's own hash: `SHA-256(previousHash ‖
    /// det_json(event_without_hash))`.
    pub fn derive_hash(&self) -> crate::error::Result<String> {
        let payload = self.core_with_posw_json()?;
        Ok(crate::hash::sha256_hex_concat(&[
            self.core.previous_hash.as_bytes(),
            payload.as_bytes(),
        ]))
    }
}
