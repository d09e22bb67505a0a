//! Offline verifier for a single exported proof or multi-tab archive.
//!
//! `typedcode-verify <file.json|file.zip>` replays every event's hash and
//! PoSW and prints a structured report. No daemon involved and no socket
//! touched — this binary only ever reads the one file it's given.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use typedcode_core::archive;
use typedcode_core::envelope::SingleFileEnvelope;
use typedcode_core::error::Error as CoreError;
use typedcode_core::verify::{verify_full, VerifyReport};

#[derive(Parser)]
#[command(name = "typedcode-verify")]
#[command(about = "Verify a typedcode proof envelope or archive offline")]
#[command(version)]
struct Cli {
    /// Path to a single-file envelope (.json) or a multi-tab archive (.zip)
    file: PathBuf,

    /// Disable ANSI color output
    #[arg(long)]
    no_color: bool,
}

fn color_enabled(no_color_flag: bool) -> bool {
    !no_color_flag && std::env::var_os("NO_COLOR").is_none()
}

fn paint(text: &str, code: &str, enabled: bool) -> String {
    if enabled {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

fn verify_single(envelope: &SingleFileEnvelope) -> Result<VerifyReport, CoreError> {
    verify_full(&envelope.initial_hash, &envelope.proof.events)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let colors = color_enabled(cli.no_color);

    match run(&cli.file, colors) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{}", paint(&err.to_string(), "31", colors));
            ExitCode::FAILURE
        }
    }
}

fn run(path: &PathBuf, colors: bool) -> anyhow::Result<bool> {
    let is_zip = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    if is_zip {
        verify_archive(path, colors)
    } else {
        verify_envelope(path, colors)
    }
}

fn verify_envelope(path: &PathBuf, colors: bool) -> anyhow::Result<bool> {
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    let envelope = SingleFileEnvelope::from_json(&text)?;

    match verify_single(&envelope) {
        Ok(report) => {
            println!(
                "{} {}/{} events, {}/{} segments checked",
                paint("PASS", "32", colors),
                report.events_checked,
                report.total_events,
                report.segments_checked,
                report.total_segments,
            );
            Ok(true)
        }
        Err(err) => {
            println!("{} {}", paint("FAIL", "31", colors), err);
            Ok(false)
        }
    }
}

fn verify_archive(path: &PathBuf, colors: bool) -> anyhow::Result<bool> {
    let file = File::open(path)?;
    let (storage, screenshots) = archive::import_archive(file)?;

    let mut all_valid = true;
    for tab in &storage.files {
        match verify_single(&tab.envelope) {
            Ok(report) => {
                println!(
                    "{} {} — {}/{} events, {}/{} segments checked",
                    paint("PASS", "32", colors),
                    tab.tab_id,
                    report.events_checked,
                    report.total_events,
                    report.segments_checked,
                    report.total_segments,
                );
            }
            Err(err) => {
                all_valid = false;
                println!("{} {} — {}", paint("FAIL", "31", colors), tab.tab_id, err);
            }
        }
    }

    match archive::verify_screenshots_against_events(&storage, &screenshots) {
        Ok(()) => {
            println!(
                "{} {} screenshot(s) bundled, hashes and event cross-check verified",
                paint("PASS", "32", colors),
                screenshots.len()
            );
        }
        Err(err) => {
            all_valid = false;
            println!("{} screenshot cross-check — {}", paint("FAIL", "31", colors), err);
        }
    }

    Ok(all_valid)
}
