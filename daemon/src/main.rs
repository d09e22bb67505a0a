//! Typedcode Daemon (typedcoded)
//!
//! Long-running service that owns the tab coordinator and exposes it over
//! a Unix-socket JSON-line protocol to the CLI and hook.
//!
//! Architecture:
//! - Unix socket listener at ~/.typedcode/typedcode.sock
//! - One `TabCoordinator` behind `Arc<DaemonState>`, backed by a rusqlite
//!   event log through `ChainStore`
//! - A background task flushes a fresh snapshot for every open tab on an
//!   interval

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{info, warn};

use typedcode_core::chain::HashChain;
use typedcode_core::checkpoint::CHECKPOINT_INTERVAL;
use typedcode_core::fingerprint::FingerprintComponents;
use typedcode_core::persistence::attach_store;
use typedcode_core::{IpcMessage, IpcResponse, TabCoordinator};

mod background;
mod db;
mod handlers;
mod server;

pub use db::Database;

/// Global daemon state. `coordinator` starts empty until the first
/// `OpenSession` message supplies a device fingerprint — every other
/// message fails with "no session open" until then.
pub struct DaemonState {
    start_time: Instant,
    shutdown: AtomicBool,
    typedcode_home: PathBuf,
    pub db: Arc<Database>,
    coordinator: RwLock<Option<Arc<TabCoordinator>>>,
}

impl DaemonState {
    pub fn new() -> Result<Self> {
        let typedcode_home = dirs::home_dir()
            .map(|h| h.join(".typedcode"))
            .unwrap_or_else(|| PathBuf::from("/tmp/.typedcode"));

        std::fs::create_dir_all(&typedcode_home).context("failed to create typedcode home")?;

        let db_path = typedcode_home.join("typedcode.db");
        let db = Arc::new(Database::open(db_path).context("failed to open event database")?);

        Ok(Self {
            start_time: Instant::now(),
            shutdown: AtomicBool::new(false),
            typedcode_home,
            db,
            coordinator: RwLock::new(None),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn socket_path(&self) -> PathBuf {
        self.typedcode_home.join("typedcode.sock")
    }

    pub async fn coordinator(&self) -> Option<Arc<TabCoordinator>> {
        self.coordinator.read().await.clone()
    }

    /// Return the open coordinator, or open one from `components` and
    /// restore every tab previously persisted to `self.db`. Idempotent:
    /// once a session is open, later calls return the existing
    /// coordinator and ignore `components`.
    pub async fn open_session(
        &self,
        components: FingerprintComponents,
        checkpoint_interval: Option<u64>,
    ) -> Result<Arc<TabCoordinator>> {
        if let Some(coordinator) = self.coordinator.read().await.as_ref() {
            return Ok(coordinator.clone());
        }

        let mut slot = self.coordinator.write().await;
        if let Some(coordinator) = slot.as_ref() {
            return Ok(coordinator.clone());
        }

        let coordinator = Arc::new(TabCoordinator::new(
            components,
            checkpoint_interval.unwrap_or(CHECKPOINT_INTERVAL),
        )?);

        for tab_id in self.db.known_tab_ids().context("failed to list known tabs")? {
            if let Some(snapshot) = self.db.load_snapshot(&tab_id)? {
                let chain = Arc::new(HashChain::restore(snapshot));
                attach_store(&chain, self.db.clone(), tab_id.clone());
                coordinator.restore_tab(tab_id, chain).await;
            }
        }

        *slot = Some(coordinator.clone());
        Ok(coordinator)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("typedcoded=info".parse()?),
        )
        .init();

    info!("Starting typedcoded v{}", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(DaemonState::new()?);

    let socket_path = state.socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    tokio::spawn(background::snapshot_flush_task(state.clone()));

    server::run(state).await
}

/// Handle a single client connection: one message in, one response out,
/// repeated for as many lines as the client sends on this connection.
async fn handle_client(mut stream: tokio::net::UnixStream, state: Arc<DaemonState>) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcMessage>(&line) {
            Ok(msg) => handlers::handle_message(msg, &state).await,
            Err(e) => {
                warn!("Invalid message: {}", e);
                IpcResponse::Error(format!("Invalid message: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;

        line.clear();
    }

    Ok(())
}
