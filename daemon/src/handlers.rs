//! Dispatch from `IpcMessage` to `TabCoordinator`/`Database` operations.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

use typedcode_core::envelope::SingleFileEnvelope;
use typedcode_core::event::{EventData, EventInput, EventType};
use typedcode_core::persistence::attach_store;
use typedcode_core::types::{DaemonStats, MaintenanceStats, TabStats};
use typedcode_core::{IpcMessage, IpcResponse};

use crate::DaemonState;

pub async fn handle_message(message: IpcMessage, state: &Arc<DaemonState>) -> IpcResponse {
    match message {
        IpcMessage::OpenSession { components, checkpoint_interval } => {
            match state.open_session(components, checkpoint_interval).await {
                Ok(_) => IpcResponse::Ok,
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::RecordEvent { tab_id, input } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            let chain = open_tracked_tab(state, &coordinator, &tab_id).await;
            match chain.record_event(input).await {
                Ok(event) => IpcResponse::Event(event),
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::RecordAttestation { tab_id, attestation } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            let chain = open_tracked_tab(state, &coordinator, &tab_id).await;

            let event_type = if chain.is_empty().await {
                EventType::HumanAttestation
            } else {
                EventType::PreExportAttestation
            };

            let input = EventInput {
                event_type,
                input_type: None,
                data: EventData::Attestation(attestation),
                range_offset: None,
                range_length: None,
                range: None,
                description: None,
                content_hash: None,
            };

            match chain.record_event(input).await {
                Ok(event) => IpcResponse::Event(event),
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::Stats => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };

            let mut tabs = Vec::new();
            for tab_id in coordinator.tab_ids().await {
                if let Some(chain) = coordinator.chain(&tab_id).await {
                    let events = chain.events().await;
                    let mut events_by_type = std::collections::BTreeMap::new();
                    for event in &events {
                        *events_by_type.entry(event.core.event_type.as_str().to_string()).or_insert(0u64) += 1;
                    }
                    tabs.push(TabStats {
                        tab_id,
                        events_recorded: events.len() as u64,
                        queued: chain.queued(),
                        checkpoints: chain.checkpoints().await.len() as u64,
                        last_hash: chain.last_hash().await,
                        elapsed_ms: chain.elapsed_ms().await,
                        events_by_type,
                    });
                }
            }

            IpcResponse::Stats(DaemonStats {
                uptime_secs: state.uptime_secs(),
                device_fingerprint_hash: coordinator.device_fingerprint().hash.clone(),
                tabs,
            })
        }

        IpcMessage::ExportTab { tab_id } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            let Some(chain) = coordinator.chain(&tab_id).await else {
                return IpcResponse::Error(format!("unknown tab: {tab_id}"));
            };

            let snapshot = chain.snapshot().await;
            let user_agent = coordinator.device_fingerprint().components.user_agent.clone();
            match SingleFileEnvelope::from_snapshot(&snapshot, now_millis(), &user_agent, None) {
                Ok(envelope) => IpcResponse::Envelope(envelope),
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::ExportBundle => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            let user_agent = coordinator.device_fingerprint().components.user_agent.clone();
            match coordinator.export_storage(now_millis(), &user_agent).await {
                Ok(storage) => IpcResponse::Bundle(storage),
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::CreateTab { tab_id, filename, language, skip_attestation } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            let is_new = coordinator.chain(&tab_id).await.is_none();
            match coordinator.create_tab(tab_id.clone(), filename, language, skip_attestation).await {
                Ok(chain) => {
                    if is_new {
                        attach_store(&chain, state.db.clone(), tab_id);
                    }
                    IpcResponse::Ok
                }
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::RenameTab { tab_id, filename } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            match coordinator.rename_tab(&tab_id, filename).await {
                Ok(()) => IpcResponse::Ok,
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::SetLanguage { tab_id, language } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            match coordinator.set_language(&tab_id, language).await {
                Ok(()) => IpcResponse::Ok,
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::SwitchTab { tab_id } => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            match coordinator.switch_tab(tab_id).await {
                Ok(()) => IpcResponse::Ok,
                Err(err) => IpcResponse::Error(err.to_string()),
            }
        }

        IpcMessage::Snapshot => {
            let Some(coordinator) = state.coordinator().await else {
                return no_session();
            };
            flush_all_snapshots(state, &coordinator).await;
            IpcResponse::Ok
        }

        IpcMessage::Ping => {
            let tabs = match state.coordinator().await {
                Some(coordinator) => coordinator.tab_ids().await.len() as u64,
                None => 0,
            };
            IpcResponse::Pong { uptime_secs: state.uptime_secs(), tabs }
        }

        IpcMessage::Shutdown => {
            state.request_shutdown();
            IpcResponse::Ok
        }

        IpcMessage::Maintenance { retention_days } => {
            let start = Instant::now();

            let events_pruned = if retention_days > 0 {
                state.db.prune_events_older_than(retention_days).unwrap_or_else(|err| {
                    warn!(error = %err, "failed to prune events");
                    0
                })
            } else {
                0
            };

            if let Err(err) = state.db.vacuum_and_analyze() {
                warn!(error = %err, "vacuum/analyze failed");
            }

            IpcResponse::Maintenance(MaintenanceStats {
                events_pruned,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Open `tab_id` (creating it on the coordinator if this is the first
/// message mentioning it) and wire its persistence hook the first time.
async fn open_tracked_tab(
    state: &Arc<DaemonState>,
    coordinator: &Arc<typedcode_core::TabCoordinator>,
    tab_id: &str,
) -> Arc<typedcode_core::chain::HashChain> {
    let is_new = coordinator.chain(tab_id).await.is_none();
    let chain = coordinator.open_tab(tab_id).await;
    if is_new {
        attach_store(&chain, state.db.clone(), tab_id.to_string());
    }
    chain
}

async fn flush_all_snapshots(state: &Arc<DaemonState>, coordinator: &Arc<typedcode_core::TabCoordinator>) {
    for tab_id in coordinator.tab_ids().await {
        let Some(chain) = coordinator.chain(&tab_id).await else { continue };
        let snapshot = chain.snapshot().await;
        if let Err(err) = state.db.save_snapshot(&tab_id, &snapshot) {
            warn!(tab_id, error = %err, "failed to flush snapshot");
        }
    }
}

fn no_session() -> IpcResponse {
    IpcResponse::Error("no session open: send OpenSession first".to_string())
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
