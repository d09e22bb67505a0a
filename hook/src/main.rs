//! Typedcode Hook - fast event-forwarding shim
//!
//! Reads one normalized event from stdin and forwards it to the running
//! daemon over its Unix socket. Designed to finish fast inside an
//! editor's event loop and never block it.
//!
//! Never falls back to local storage: an event the chain's single
//! writer never saw would corrupt the append-only sequencing the
//! daemon guarantees, so a daemon that isn't running just means this
//! event is silently dropped rather than recorded out of band.

use std::io::{self, Read};

use serde::Deserialize;

use typedcode_core::event::EventInput;
use typedcode_core::{IpcClient, IpcMessage};

#[derive(Debug, Deserialize)]
struct HookInput {
    tab_id: String,
    input: EventInput,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let mut raw = String::new();
    if io::stdin().read_to_string(&mut raw).is_err() {
        return 0;
    }
    if raw.trim().is_empty() {
        return 0;
    }

    let hook: HookInput = match serde_json::from_str(&raw) {
        Ok(h) => h,
        Err(_) => return 0,
    };

    let client = IpcClient::new();
    let _ = client.send(&IpcMessage::RecordEvent { tab_id: hook.tab_id, input: hook.input });
    0
}
