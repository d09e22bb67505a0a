//! Archive export/import: a ZIP bundle of per-tab proofs plus the
//! screenshots those proofs' `ScreenshotCapture` events reference.
//!
//! A JSON envelope alone can prove what was typed; it can't prove a
//! screenshot a reviewer is looking at is the one the chain actually
//! captured. The archive format closes that gap: every screenshot file is
//! listed in a manifest with its SHA-256, so `import_archive` can detect a
//! swapped-in image before handing anything back to the caller.

use std::io::{Read, Seek, Write};

use serde::{Deserialize, Serialize};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::envelope::{MultiTabStorage, TabEnvelope, TabSwitchEntry};
use crate::error::{Error, Result};
use crate::event::EventType;
use crate::hash::sha256_hex;

const MANIFEST_PATH: &str = "manifest.json";
const README_PATH: &str = "README.txt";

fn proof_path(filename: &str) -> String {
    format!("proofs/{filename}.json")
}

fn screenshot_path(file_name: &str) -> String {
    format!("screenshots/{file_name}")
}

fn readme_contents(tab_count: usize, screenshot_count: usize) -> String {
    format!(
        "This archive bundles {tab_count} typing-proof file(s) and {screenshot_count} \
screenshot(s) captured during the session.\n\n\
manifest.json lists every bundled file and its SHA-256; proofs/ holds one \
hash-chain proof per tab; screenshots/ holds the raw captured images those \
proofs' screenshotCapture events reference.\n\n\
Verify with the typedcode-verify tool, or independently: recompute each \
screenshot's SHA-256 against manifest.json, then replay each proof's event \
chain and confirm every hash and proof-of-sequential-work link.\n"
    )
}

/// A screenshot file bundled alongside its owning tab's proof.
#[derive(Debug, Clone)]
pub struct ScreenshotFile {
    pub tab_id: String,
    pub event_sequence: u64,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestScreenshot {
    tab_id: String,
    event_sequence: u64,
    file_name: String,
    sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFile {
    tab_id: String,
    filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    version: String,
    #[serde(rename = "type")]
    kind: String,
    files: Vec<ManifestFile>,
    screenshots: Vec<ManifestScreenshot>,
    #[serde(default)]
    tab_switches: Vec<TabSwitchEntry>,
}

/// Write `storage` and `screenshots` into a ZIP archive.
///
/// Layout:
/// - `manifest.json` — tab id order and the screenshot index
/// - `proofs/<tabId>.json` — each tab's `SingleFileEnvelope`
/// - `screenshots/<fileName>` — raw image bytes
/// - `README.txt` — plain-text orientation for a human opening the archive
pub fn export_archive<W: Write + std::io::Seek>(
    writer: W,
    storage: &MultiTabStorage,
    screenshots: &[ScreenshotFile],
) -> Result<()> {
    let mut zip = ZipWriter::new(writer);
    let options: FileOptions = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let manifest = Manifest {
        version: storage.version.clone(),
        kind: storage.kind.clone(),
        files: storage
            .files
            .iter()
            .map(|f| ManifestFile { tab_id: f.tab_id.clone(), filename: f.filename.clone() })
            .collect(),
        screenshots: screenshots
            .iter()
            .map(|s| ManifestScreenshot {
                tab_id: s.tab_id.clone(),
                event_sequence: s.event_sequence,
                file_name: s.file_name.clone(),
                sha256: sha256_hex(&s.bytes),
            })
            .collect(),
        tab_switches: storage.tab_switches.clone(),
    };

    zip.start_file(MANIFEST_PATH, options)?;
    zip.write_all(serde_json::to_string_pretty(&manifest).map_err(Error::Serialization)?.as_bytes())?;

    for tab in &storage.files {
        zip.start_file(proof_path(&tab.filename), options)?;
        zip.write_all(tab.envelope.to_json()?.as_bytes())?;
    }

    for screenshot in screenshots {
        zip.start_file(screenshot_path(&screenshot.file_name), options)?;
        zip.write_all(&screenshot.bytes)?;
    }

    zip.start_file(README_PATH, options)?;
    zip.write_all(readme_contents(storage.files.len(), screenshots.len()).as_bytes())?;

    zip.finish()?;
    Ok(())
}

/// Read a ZIP archive back into a `MultiTabStorage` and its screenshots,
/// verifying every screenshot's bytes against the manifest's recorded
/// SHA-256 before returning. Does not itself run `verify::verify_full` on
/// the recovered proofs — callers that need tamper-evidence over the
/// event chains should do that separately.
pub fn import_archive<R: Read + Seek>(reader: R) -> Result<(MultiTabStorage, Vec<ScreenshotFile>)> {
    let mut zip = ZipArchive::new(reader)?;

    let manifest: Manifest = {
        let mut entry = zip
            .by_name(MANIFEST_PATH)
            .map_err(|_| Error::MalformedEnvelope("archive missing manifest.json".to_string()))?;
        let mut text = String::new();
        entry.read_to_string(&mut text)?;
        serde_json::from_str(&text).map_err(Error::Serialization)?
    };

    let mut files = Vec::with_capacity(manifest.files.len());
    for manifest_file in &manifest.files {
        let path = proof_path(&manifest_file.filename);
        let mut entry = zip.by_name(&path).map_err(|_| {
            Error::MalformedEnvelope(format!("archive missing proof for tab {}", manifest_file.tab_id))
        })?;
        let mut text = String::new();
        entry.read_to_string(&mut text)?;
        let envelope = crate::envelope::SingleFileEnvelope::from_json(&text)?;
        files.push(TabEnvelope {
            tab_id: manifest_file.tab_id.clone(),
            filename: manifest_file.filename.clone(),
            envelope,
        });
    }

    let mut screenshots = Vec::with_capacity(manifest.screenshots.len());
    for entry_meta in &manifest.screenshots {
        let path = screenshot_path(&entry_meta.file_name);
        let mut entry = zip
            .by_name(&path)
            .map_err(|_| Error::ScreenshotMissing(entry_meta.file_name.clone()))?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;

        let computed = sha256_hex(&bytes);
        if computed != entry_meta.sha256 {
            return Err(Error::ScreenshotHashMismatch(entry_meta.file_name.clone()));
        }

        screenshots.push(ScreenshotFile {
            tab_id: entry_meta.tab_id.clone(),
            event_sequence: entry_meta.event_sequence,
            file_name: entry_meta.file_name.clone(),
            bytes,
        });
    }

    let total_files = files.len();
    let overall_pure_typing = files.iter().all(|f| f.envelope.metadata.is_pure_typing);
    let storage = MultiTabStorage {
        version: manifest.version,
        kind: manifest.kind,
        files,
        metadata: crate::envelope::MultiTabMetadata { total_files, overall_pure_typing },
        tab_switches: manifest.tab_switches,
    };
    Ok((storage, screenshots))
}

/// Cross-check every bundled screenshot against the chain event it claims
/// to document: `tab_id` must name a tab present in `storage`, and that
/// tab's event at `event_sequence` must actually be a `ScreenshotCapture`.
/// `import_archive` already confirms each screenshot's bytes match the
/// manifest's recorded SHA-256; this closes the other half of §6's
/// cross-check — a swapped-in image with correct bytes but pointing at an
/// event that was never a capture (or doesn't exist) is still rejected.
pub fn verify_screenshots_against_events(
    storage: &MultiTabStorage,
    screenshots: &[ScreenshotFile],
) -> Result<()> {
    for screenshot in screenshots {
        let tab = storage
            .files
            .iter()
            .find(|f| f.tab_id == screenshot.tab_id)
            .ok_or_else(|| Error::ScreenshotMissing(screenshot.file_name.clone()))?;

        let event = tab
            .envelope
            .proof
            .events
            .get(screenshot.event_sequence as usize)
            .ok_or_else(|| Error::ScreenshotMissing(screenshot.file_name.clone()))?;

        if event.core.sequence != screenshot.event_sequence
            || event.core.event_type != EventType::ScreenshotCapture
        {
            return Err(Error::ScreenshotMissing(screenshot.file_name.clone()));
        }
    }
    Ok(())
}
