//! Multi-tab coordination: several independent hash chains sharing one
//! device fingerprint.
//!
//! A human editing several files in one sitting should produce one device
//! fingerprint and one set of per-tab proofs, not a fresh fingerprint per
//! tab — that would make it look like several different devices touched
//! the session. `TabCoordinator` derives the fingerprint once and hands
//! each tab its own `HashChain` seeded from it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::chain::HashChain;
use crate::envelope::{MultiTabStorage, SingleFileEnvelope};
use crate::error::{Error, Result};
use crate::event::{Attestation, EventData, EventInput, EventType};
use crate::fingerprint::{DeviceFingerprint, FingerprintComponents};

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Mint a fresh v4 UUID for `TabState::id`. The editor extension that owns
/// a tab's lifecycle normally assigns this itself and passes it on every
/// call into this crate; this is for hosts (the bare CLI, bulk template
/// import) that have no ID of their own to offer.
pub fn generate_tab_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Where a tab's chain currently stands with respect to verification.
/// Purely descriptive bookkeeping the coordinator carries on behalf of a
/// host UI — neither this crate's `verify` module nor `HashChain` reads
/// it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationState {
    Pending,
    Verified,
    Failed,
    Skipped,
}

/// Everything about one open tab beyond its hash chain: display metadata
/// a host needs (filename, language, when it was opened) and the last
/// verification outcome recorded against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub id: String,
    pub filename: String,
    pub language: String,
    pub created_at: u64,
    pub verification_state: VerificationState,
    pub verification_details: Option<String>,
}

/// One tab-switch, logged chain-relative (wall-clock millis since the
/// UNIX epoch, the same clock `HashChain::record_event` stamps events
/// with) so a verifier can correlate switches against event timestamps
/// without the coordinator itself needing to be a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSwitchEvent {
    pub timestamp: u64,
    pub from_tab_id: Option<String>,
    pub to_tab_id: String,
    pub from_filename: Option<String>,
    pub to_filename: Option<String>,
}

pub struct TabCoordinator {
    fingerprint: DeviceFingerprint,
    checkpoint_interval: u64,
    chains: RwLock<BTreeMap<String, Arc<HashChain>>>,
    states: RwLock<BTreeMap<String, TabState>>,
    tab_switches: RwLock<Vec<TabSwitchEvent>>,
    active_tab: RwLock<Option<String>>,
}

impl TabCoordinator {
    pub fn new(components: FingerprintComponents, checkpoint_interval: u64) -> Result<Self> {
        Ok(Self {
            fingerprint: DeviceFingerprint::derive(components)?,
            checkpoint_interval,
            chains: RwLock::new(BTreeMap::new()),
            states: RwLock::new(BTreeMap::new()),
            tab_switches: RwLock::new(Vec::new()),
            active_tab: RwLock::new(None),
        })
    }

    pub fn device_fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }

    /// Open a new tab, or return the existing chain if `tab_id` is already
    /// open. Leaves no `TabState` behind — callers that need filename,
    /// language, or verification bookkeeping should use `create_tab`.
    pub async fn open_tab(&self, tab_id: impl Into<String>) -> Arc<HashChain> {
        let tab_id = tab_id.into();
        let mut chains = self.chains.write().await;
        chains
            .entry(tab_id)
            .or_insert_with(|| {
                Arc::new(HashChain::from_fingerprint(
                    self.fingerprint.clone(),
                    self.checkpoint_interval,
                ))
            })
            .clone()
    }

    /// Open a new tab with full `TabState` bookkeeping (filename,
    /// language). When `skip_attestation` is set — bulk template import,
    /// where there is no human present to attest per file — the
    /// coordinator immediately records a synthetic, unverified
    /// `HumanAttestation` as the chain's event 0 so invariant (v) ("event
    /// 0 must be the human-attestation record") still holds, and marks
    /// the tab's `verification_state` as `Skipped` rather than `Pending`
    /// so a reviewer can tell the two apart. Returns the existing chain
    /// and state unchanged if `tab_id` is already open.
    pub async fn create_tab(
        &self,
        tab_id: impl Into<String>,
        filename: impl Into<String>,
        language: impl Into<String>,
        skip_attestation: bool,
    ) -> Result<Arc<HashChain>> {
        let tab_id = tab_id.into();
        if let Some(chain) = self.chain(&tab_id).await {
            return Ok(chain);
        }

        let chain = self.open_tab(tab_id.clone()).await;
        let created_at = now_millis();

        if skip_attestation {
            chain
                .record_event(EventInput {
                    event_type: EventType::HumanAttestation,
                    input_type: None,
                    data: EventData::Attestation(Attestation {
                        verified: false,
                        score: 0.0,
                        action: "skip_attestation".to_string(),
                        timestamp: created_at.to_string(),
                        hostname: String::new(),
                        signature: String::new(),
                        success: false,
                    }),
                    range_offset: None,
                    range_length: None,
                    range: None,
                    description: Some("bulk template import, no per-file attestation".to_string()),
                    content_hash: None,
                })
                .await?;
        }

        let state = TabState {
            id: tab_id.clone(),
            filename: filename.into(),
            language: language.into(),
            created_at,
            verification_state: if skip_attestation { VerificationState::Skipped } else { VerificationState::Pending },
            verification_details: None,
        };
        self.states.write().await.insert(tab_id.clone(), state);
        self.active_tab.write().await.get_or_insert(tab_id);

        Ok(chain)
    }

    pub async fn tab_state(&self, tab_id: &str) -> Option<TabState> {
        self.states.read().await.get(tab_id).cloned()
    }

    pub async fn rename_tab(&self, tab_id: &str, filename: impl Into<String>) -> Result<()> {
        let mut states = self.states.write().await;
        let state = states.get_mut(tab_id).ok_or_else(|| Error::Other(format!("unknown tab: {tab_id}")))?;
        state.filename = filename.into();
        Ok(())
    }

    pub async fn set_language(&self, tab_id: &str, language: impl Into<String>) -> Result<()> {
        let mut states = self.states.write().await;
        let state = states.get_mut(tab_id).ok_or_else(|| Error::Other(format!("unknown tab: {tab_id}")))?;
        state.language = language.into();
        Ok(())
    }

    pub async fn set_verification_state(
        &self,
        tab_id: &str,
        verification_state: VerificationState,
        verification_details: Option<String>,
    ) -> Result<()> {
        let mut states = self.states.write().await;
        let state = states.get_mut(tab_id).ok_or_else(|| Error::Other(format!("unknown tab: {tab_id}")))?;
        state.verification_state = verification_state;
        state.verification_details = verification_details;
        Ok(())
    }

    /// Record a switch to `to_tab_id`, logging where the switch came from
    /// (if anywhere) and updating the active tab. Does not require
    /// `to_tab_id` to already be open — a host may switch to a tab before
    /// its first event is recorded.
    pub async fn switch_tab(&self, to_tab_id: impl Into<String>) -> Result<()> {
        let to_tab_id = to_tab_id.into();
        let mut active = self.active_tab.write().await;
        let states = self.states.read().await;

        let from_tab_id = active.clone();
        let from_filename = from_tab_id.as_deref().and_then(|id| states.get(id)).map(|s| s.filename.clone());
        let to_filename = states.get(&to_tab_id).map(|s| s.filename.clone());
        drop(states);

        self.tab_switches.write().await.push(TabSwitchEvent {
            timestamp: now_millis(),
            from_tab_id,
            to_tab_id: to_tab_id.clone(),
            from_filename,
            to_filename,
        });
        *active = Some(to_tab_id);
        Ok(())
    }

    pub async fn tab_switches(&self) -> Vec<TabSwitchEvent> {
        self.tab_switches.read().await.clone()
    }

    pub async fn active_tab_id(&self) -> Option<String> {
        self.active_tab.read().await.clone()
    }

    pub async fn chain(&self, tab_id: &str) -> Option<Arc<HashChain>> {
        self.chains.read().await.get(tab_id).cloned()
    }

    /// Insert a chain recovered from storage under `tab_id`, if nothing is
    /// already open under that id. Used by a host restoring every tab's
    /// last persisted snapshot on startup.
    pub async fn restore_tab(&self, tab_id: String, chain: Arc<HashChain>) {
        let mut chains = self.chains.write().await;
        chains.entry(tab_id).or_insert(chain);
    }

    pub async fn tab_ids(&self) -> Vec<String> {
        self.chains.read().await.keys().cloned().collect()
    }

    /// Close a tab. The last open tab in a bundle may never be closed —
    /// a bundle with zero tabs has nothing left to attest to, and a host
    /// that wants to discard the whole session should drop the
    /// coordinator itself instead.
    pub async fn close_tab(&self, tab_id: &str) -> Result<()> {
        let mut chains = self.chains.write().await;
        if chains.len() <= 1 {
            return Err(Error::LastTabCannotClose);
        }
        chains.remove(tab_id);
        drop(chains);

        self.states.write().await.remove(tab_id);
        let mut active = self.active_tab.write().await;
        if active.as_deref() == Some(tab_id) {
            *active = None;
        }
        Ok(())
    }

    /// Build a `MultiTabStorage` export of every open tab, in the order
    /// tabs were opened. Tabs opened through `create_tab` contribute their
    /// tracked filename; tabs opened through the bare `open_tab` (which
    /// never registers a `TabState`) fall back to `tab_id` as the
    /// filename, the same as before `TabState` existed. `finalContentHash`
    /// falls back to the hash of the empty string — the coordinator never
    /// reads a tab's live document contents.
    pub async fn export_storage(&self, exported_at: u64, user_agent: &str) -> Result<MultiTabStorage> {
        let chains = self.chains.read().await;
        let states = self.states.read().await;
        let mut entries = Vec::with_capacity(chains.len());
        for (tab_id, chain) in chains.iter() {
            let filename = states.get(tab_id).map(|s| s.filename.clone()).unwrap_or_else(|| tab_id.clone());
            let snapshot = chain.snapshot().await;
            let envelope = SingleFileEnvelope::from_snapshot(&snapshot, exported_at, user_agent, None)?;
            entries.push((tab_id.clone(), filename, envelope));
        }
        drop(states);
        drop(chains);

        let tab_switches = self
            .tab_switches
            .read()
            .await
            .iter()
            .map(|s| crate::envelope::TabSwitchEntry {
                timestamp: s.timestamp,
                from_tab_id: s.from_tab_id.clone(),
                to_tab_id: s.to_tab_id.clone(),
                from_filename: s.from_filename.clone(),
                to_filename: s.to_filename.clone(),
            })
            .collect();

        Ok(MultiTabStorage::with_tab_switches(entries, tab_switches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components() -> FingerprintComponents {
        FingerprintComponents {
            user_agent: "UA".to_string(),
            platform: "P".to_string(),
            languages: vec!["en".to_string()],
            hardware_concurrency: Some(4),
            device_memory_gb: Some(8),
            screen: crate::fingerprint::ScreenGeometry {
                width: 1280,
                height: 720,
                color_depth: Some(24),
            },
            timezone: "UTC".to_string(),
            canvas_probe: None,
            webgl_probe: None,
            fonts: vec![],
            cookie_enabled: true,
            do_not_track: None,
            max_touch_points: 0,
        }
    }

    #[tokio::test]
    async fn tabs_share_one_device_fingerprint() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        let a = coordinator.open_tab("a").await;
        let b = coordinator.open_tab("b").await;
        // Each tab's initial hash is salted independently, but both derive
        // from the one fingerprint the coordinator holds.
        assert_ne!(a.initial_hash().await, b.initial_hash().await);
        assert_eq!(
            a.device_fingerprint().await.hash,
            b.device_fingerprint().await.hash
        );
        assert_eq!(
            coordinator.device_fingerprint().hash,
            a.device_fingerprint().await.hash
        );
    }

    #[tokio::test]
    async fn reopening_the_same_tab_id_returns_the_same_chain() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        let a1 = coordinator.open_tab("a").await;
        let a2 = coordinator.open_tab("a").await;
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[tokio::test]
    async fn closing_the_last_tab_is_rejected() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.open_tab("only").await;
        let err = coordinator.close_tab("only").await.unwrap_err();
        assert!(matches!(err, Error::LastTabCannotClose));
    }

    #[tokio::test]
    async fn closing_a_non_last_tab_succeeds() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.open_tab("a").await;
        coordinator.open_tab("b").await;
        coordinator.close_tab("a").await.unwrap();
        assert_eq!(coordinator.tab_ids().await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn export_storage_covers_every_open_tab() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.open_tab("a").await;
        coordinator.open_tab("b").await;
        let storage = coordinator.export_storage(1, "test-agent").await.unwrap();
        assert_eq!(storage.tab_ids().len(), 2);
    }

    #[tokio::test]
    async fn restore_tab_does_not_clobber_an_already_open_tab() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        let live = coordinator.open_tab("a").await;
        let recovered = Arc::new(HashChain::from_fingerprint(
            coordinator.device_fingerprint().clone(),
            50,
        ));
        coordinator.restore_tab("a".to_string(), recovered).await;
        assert!(Arc::ptr_eq(&live, &coordinator.chain("a").await.unwrap()));
    }

    #[tokio::test]
    async fn create_tab_without_skip_leaves_chain_empty_and_pending() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        let chain = coordinator.create_tab("a", "main.rs", "rust", false).await.unwrap();
        assert_eq!(chain.len().await, 0);
        let state = coordinator.tab_state("a").await.unwrap();
        assert_eq!(state.filename, "main.rs");
        assert_eq!(state.language, "rust");
        assert_eq!(state.verification_state, VerificationState::Pending);
    }

    #[tokio::test]
    async fn create_tab_with_skip_attestation_opens_chain_and_marks_skipped() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        let chain = coordinator.create_tab("tpl", "template.py", "python", true).await.unwrap();
        assert_eq!(chain.len().await, 1);
        let events = chain.events().await;
        assert!(matches!(events[0].core.event_type, EventType::HumanAttestation));
        let state = coordinator.tab_state("tpl").await.unwrap();
        assert_eq!(state.verification_state, VerificationState::Skipped);
    }

    #[tokio::test]
    async fn rename_and_set_language_update_state() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "main.rs", "rust", false).await.unwrap();
        coordinator.rename_tab("a", "lib.rs").await.unwrap();
        coordinator.set_language("a", "plaintext").await.unwrap();
        let state = coordinator.tab_state("a").await.unwrap();
        assert_eq!(state.filename, "lib.rs");
        assert_eq!(state.language, "plaintext");
    }

    #[tokio::test]
    async fn rename_unknown_tab_fails() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        let err = coordinator.rename_tab("ghost", "x.rs").await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[tokio::test]
    async fn switch_tab_logs_from_and_to() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "a.rs", "rust", false).await.unwrap();
        coordinator.create_tab("b", "b.rs", "rust", false).await.unwrap();
        coordinator.switch_tab("b").await.unwrap();

        let switches = coordinator.tab_switches().await;
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].to_tab_id, "b");
        assert_eq!(switches[0].from_tab_id.as_deref(), Some("a"));
        assert_eq!(switches[0].to_filename.as_deref(), Some("b.rs"));
        assert_eq!(coordinator.active_tab_id().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn first_create_tab_becomes_active_without_an_explicit_switch() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "a.rs", "rust", false).await.unwrap();
        assert_eq!(coordinator.active_tab_id().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn closing_active_tab_clears_active_tab_id() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "a.rs", "rust", false).await.unwrap();
        coordinator.create_tab("b", "b.rs", "rust", false).await.unwrap();
        coordinator.close_tab("a").await.unwrap();
        assert_eq!(coordinator.active_tab_id().await, None);
    }

    #[tokio::test]
    async fn export_storage_uses_tracked_filenames() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "main.c", "c", false).await.unwrap();
        let storage = coordinator.export_storage(1, "test-agent").await.unwrap();
        assert_eq!(storage.filenames(), vec!["main.c"]);
    }

    #[tokio::test]
    async fn export_storage_carries_tab_switches() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "a.rs", "rust", false).await.unwrap();
        coordinator.create_tab("b", "b.rs", "rust", false).await.unwrap();
        coordinator.switch_tab("b").await.unwrap();

        let storage = coordinator.export_storage(1, "test-agent").await.unwrap();
        assert_eq!(storage.tab_switches.len(), 1);
        assert_eq!(storage.tab_switches[0].to_tab_id, "b");
    }

    #[test]
    fn generate_tab_id_produces_distinct_parseable_uuids() {
        let a = generate_tab_id();
        let b = generate_tab_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn set_verification_state_records_outcome() {
        let coordinator = TabCoordinator::new(components(), 50).unwrap();
        coordinator.create_tab("a", "a.rs", "rust", false).await.unwrap();
        coordinator
            .set_verification_state("a", VerificationState::Failed, Some("hash mismatch at 3".to_string()))
            .await
            .unwrap();
        let state = coordinator.tab_state("a").await.unwrap();
        assert_eq!(state.verification_state, VerificationState::Failed);
        assert_eq!(state.verification_details.as_deref(), Some("hash mismatch at 3"));
    }
}
