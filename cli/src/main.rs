//! Typedcode CLI
//!
//! Thin client that talks to `typedcoded` over its Unix socket. Every
//! subcommand opens one connection, sends one message, prints the
//! response, and exits.
//!
//! Commands:
//! - typedcode record <json> [--tab <id>]
//! - typedcode attest <json> [--tab <id>]
//! - typedcode stats
//! - typedcode export <tab-id> [--out path]
//! - typedcode export-bundle [--out path.zip]
//! - typedcode create-tab <filename> [--tab-id <id>] [--language <lang>] [--skip-attestation]
//! - typedcode rename-tab <id> <filename>
//! - typedcode set-language <id> <language>
//! - typedcode switch-tab <id>
//! - typedcode daemon start|stop|status

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use typedcode_core::event::{Attestation, EventInput};
use typedcode_core::{IpcClient, IpcMessage, IpcResponse};

const DEFAULT_TAB_ID: &str = "default";

#[derive(Parser)]
#[command(name = "typedcode")]
#[command(about = "Thin client for the typedcode proof-chain daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an event on a tab (opens the session/tab if needed)
    Record {
        /// JSON-encoded EventInput
        json: String,

        #[arg(long, default_value = DEFAULT_TAB_ID)]
        tab: String,
    },

    /// Record a human attestation on a tab
    Attest {
        /// JSON-encoded Attestation
        json: String,

        #[arg(long, default_value = DEFAULT_TAB_ID)]
        tab: String,
    },

    /// Print aggregate stats across every open tab
    Stats,

    /// Export one tab's complete proof to a file (or stdout)
    Export {
        tab_id: String,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export every open tab as a ZIP archive of per-tab proofs
    ExportBundle {
        #[arg(long, default_value = "typedcode-export.zip")]
        out: PathBuf,
    },

    /// Open a new tab with a tracked filename/language. Without
    /// `--tab-id`, a fresh v4 UUID is minted and printed.
    CreateTab {
        filename: String,

        #[arg(long)]
        tab_id: Option<String>,

        #[arg(long, default_value = "plaintext")]
        language: String,

        /// Skip per-file human attestation (bulk template import)
        #[arg(long)]
        skip_attestation: bool,
    },

    /// Rename an open tab's tracked filename
    RenameTab { tab_id: String, filename: String },

    /// Change an open tab's tracked language
    SetLanguage { tab_id: String, language: String },

    /// Log a switch to another tab
    SwitchTab { tab_id: String },

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon if it isn't already running
    Start,
    /// Ask the running daemon to shut down
    Stop,
    /// Report whether the daemon is running and responding
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = IpcClient::new();

    match cli.command {
        Commands::Record { json, tab } => {
            let input: EventInput = serde_json::from_str(&json).context("invalid event JSON")?;
            match client.send(&IpcMessage::RecordEvent { tab_id: tab, input }) {
                Ok(IpcResponse::Event(event)) => {
                    println!("{}", serde_json::to_string_pretty(&event)?);
                }
                Ok(IpcResponse::Error(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("Daemon unreachable: {err}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Attest { json, tab } => {
            let attestation: Attestation = serde_json::from_str(&json).context("invalid attestation JSON")?;
            match client.send(&IpcMessage::RecordAttestation { tab_id: tab, attestation }) {
                Ok(IpcResponse::Event(event)) => {
                    println!("{}", serde_json::to_string_pretty(&event)?);
                }
                Ok(IpcResponse::Error(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("Daemon unreachable: {err}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Stats => match client.send(&IpcMessage::Stats) {
            Ok(IpcResponse::Stats(stats)) => {
                println!("Uptime: {}s", stats.uptime_secs);
                println!("Device fingerprint: {}", stats.device_fingerprint_hash);
                println!("Tabs: {}", stats.tabs.len());
                for tab in &stats.tabs {
                    println!(
                        "  {} — {} events ({} queued), {} checkpoints, {}ms elapsed, last hash {}",
                        tab.tab_id,
                        tab.events_recorded,
                        tab.queued,
                        tab.checkpoints,
                        tab.elapsed_ms,
                        tab.last_hash
                    );
                    for (event_type, count) in &tab.events_by_type {
                        println!("      {event_type}: {count}");
                    }
                }
            }
            Ok(IpcResponse::Error(msg)) => {
                eprintln!("Error: {msg}");
                std::process::exit(1);
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("Daemon unreachable: {err}");
                std::process::exit(1);
            }
        },

        Commands::Export { tab_id, out } => match client.send(&IpcMessage::ExportTab { tab_id }) {
            Ok(IpcResponse::Envelope(envelope)) => {
                let json = envelope.to_json()?;
                match out {
                    Some(path) => std::fs::write(&path, json).context("failed to write envelope")?,
                    None => println!("{json}"),
                }
            }
            Ok(IpcResponse::Error(msg)) => {
                eprintln!("Error: {msg}");
                std::process::exit(1);
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("Daemon unreachable: {err}");
                std::process::exit(1);
            }
        },

        Commands::ExportBundle { out } => match client.send(&IpcMessage::ExportBundle) {
            Ok(IpcResponse::Bundle(storage)) => {
                let file = File::create(&out).context("failed to create archive")?;
                typedcode_core::archive::export_archive(file, &storage, &[])
                    .context("failed to write archive")?;
                println!("Wrote {}", out.display());
            }
            Ok(IpcResponse::Error(msg)) => {
                eprintln!("Error: {msg}");
                std::process::exit(1);
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("Daemon unreachable: {err}");
                std::process::exit(1);
            }
        },

        Commands::CreateTab { tab_id, filename, language, skip_attestation } => {
            let tab_id = tab_id.unwrap_or_else(typedcode_core::tabs::generate_tab_id);
            match client.send(&IpcMessage::CreateTab { tab_id: tab_id.clone(), filename, language, skip_attestation }) {
                Ok(IpcResponse::Ok) => println!("Tab created: {tab_id}"),
                Ok(IpcResponse::Error(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("Daemon unreachable: {err}");
                    std::process::exit(1);
                }
            }
        }

        Commands::RenameTab { tab_id, filename } => {
            match client.send(&IpcMessage::RenameTab { tab_id, filename }) {
                Ok(IpcResponse::Ok) => println!("Tab renamed"),
                Ok(IpcResponse::Error(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("Daemon unreachable: {err}");
                    std::process::exit(1);
                }
            }
        }

        Commands::SetLanguage { tab_id, language } => {
            match client.send(&IpcMessage::SetLanguage { tab_id, language }) {
                Ok(IpcResponse::Ok) => println!("Language updated"),
                Ok(IpcResponse::Error(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(1);
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("Daemon unreachable: {err}");
                    std::process::exit(1);
                }
            }
        }

        Commands::SwitchTab { tab_id } => match client.send(&IpcMessage::SwitchTab { tab_id }) {
            Ok(IpcResponse::Ok) => println!("Switched tab"),
            Ok(IpcResponse::Error(msg)) => {
                eprintln!("Error: {msg}");
                std::process::exit(1);
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("Daemon unreachable: {err}");
                std::process::exit(1);
            }
        },

        Commands::Daemon { command } => match command {
            DaemonCommands::Start => daemon_start(&client)?,
            DaemonCommands::Stop => daemon_stop(&client),
            DaemonCommands::Status => daemon_status(&client),
        },
    }

    Ok(())
}

fn daemon_start(client: &IpcClient) -> Result<()> {
    if client.daemon_available() && client.ping().is_ok() {
        println!("Daemon is already running");
        return Ok(());
    }

    let daemon_path = std::env::current_exe()?
        .parent()
        .map(|p| p.join("typedcoded"))
        .context("could not determine executable directory")?;

    if !daemon_path.exists() {
        eprintln!("Daemon binary not found at {:?}", daemon_path);
        eprintln!("Hint: build with 'cargo build --release' first");
        std::process::exit(1);
    }

    let typedcode_home = dirs::home_dir()
        .map(|h| h.join(".typedcode"))
        .unwrap_or_else(|| PathBuf::from("/tmp/.typedcode"));
    let logs_dir = typedcode_home.join("logs");
    std::fs::create_dir_all(&logs_dir).ok();

    use std::process::{Command, Stdio};
    let log_file = File::create(logs_dir.join("daemon.log")).context("failed to create log file")?;
    let err_file = File::create(logs_dir.join("daemon.err")).context("failed to create error log file")?;

    let child = Command::new(&daemon_path)
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(err_file))
        .spawn()
        .context("failed to start daemon")?;

    let pid_file = typedcode_home.join("daemon.pid");
    std::fs::write(&pid_file, child.id().to_string()).context("failed to write PID file")?;

    println!("Daemon started with PID {}", child.id());
    println!("Logs: {}", logs_dir.display());

    std::thread::sleep(Duration::from_millis(500));
    if client.ping().is_ok() {
        println!("Daemon is running and responding");
    } else {
        eprintln!("Warning: daemon started but not responding yet");
        eprintln!("Check logs: {}", logs_dir.join("daemon.err").display());
    }

    Ok(())
}

fn daemon_stop(client: &IpcClient) {
    match client.send(&IpcMessage::Shutdown) {
        Ok(IpcResponse::Ok) => println!("Daemon stopped"),
        Ok(IpcResponse::Error(e)) => eprintln!("Error: {e}"),
        Ok(_) => {}
        Err(_) => println!("Daemon is not running"),
    }
}

fn daemon_status(client: &IpcClient) {
    match client.send(&IpcMessage::Ping) {
        Ok(IpcResponse::Pong { uptime_secs, tabs }) => {
            println!("Daemon: running");
            println!("Uptime: {uptime_secs}s");
            println!("Open tabs: {tabs}");
        }
        Ok(IpcResponse::Error(e)) => eprintln!("Daemon error: {e}"),
        Ok(_) => {}
        Err(_) => println!("Daemon: not running"),
    }
}
