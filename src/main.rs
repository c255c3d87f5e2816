//! `harlowe-coredoctor` — diagnostic CLI for the Harlowe edit-coordination
//! engine.
//!
//! This crate's primary interface is the library (`harlowe_core`); a host
//! application embeds [`version_store`](harlowe_core::version_store),
//! [`workspace`](harlowe_core::workspace), [`merge_coordinator`]
//! (harlowe_core::merge_coordinator), [`thread_manager`]
//! (harlowe_core::thread_manager) and [`undo_engine`]
//! (harlowe_core::undo_engine) directly. This binary exists only to verify
//! that a document and its environment are set up for that host to work:
//! `git` is invocable, the document exists, the workspaces directory is
//! writable, and the configured assistant executable runs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use harlowe_core::config::HarloweConfig;
use harlowe_core::version_store::VersionStore;

/// Check that a document is ready for Harlowe to coordinate edits on it.
#[derive(Parser)]
#[command(name = "harlowe-coredoctor")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the document to check. Overrides `document.path` in config.
    #[arg(long, env = "HARLOWE_DOCUMENT")]
    document: Option<PathBuf>,

    /// Path to the Harlowe config file.
    #[arg(long, default_value = "harlowe.toml", env = "HARLOWE_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = harlowe_core::telemetry::init();
    let cli = Cli::parse();

    println!("harlowe-coredoctor");
    println!("===================");
    println!();

    let mut all_ok = true;

    let config = match HarloweConfig::load(&cli.config) {
        Ok(cfg) => {
            println!("[OK] config ({}): loaded", cli.config.display());
            cfg
        }
        Err(e) => {
            println!("[FAIL] config ({}): {e}", cli.config.display());
            all_ok = false;
            HarloweConfig::default()
        }
    };

    let document = cli.document.clone().or_else(|| config.document.path.clone());
    let Some(document) = document else {
        println!("[FAIL] document: no path given (pass --document or set [document].path)");
        println!("       harlowe-coredoctor cannot continue without a document.");
        return ExitCode::FAILURE;
    };

    if document.is_file() {
        println!("[OK] document ({}): found", document.display());
    } else {
        println!("[FAIL] document ({}): not found", document.display());
        all_ok = false;
    }

    let store = VersionStore::open(&document).await;
    if store.available() {
        println!("[OK] git: invocable, history available");
    } else {
        println!("[FAIL] git: not invocable, or repository setup failed");
        println!("       Install git and ensure it is on PATH.");
        all_ok = false;
    }

    let workspaces_dir = config.workspaces_dir(&document);
    match tokio::fs::create_dir_all(&workspaces_dir).await {
        Ok(()) => println!("[OK] workspaces dir ({}): writable", workspaces_dir.display()),
        Err(e) => {
            println!("[FAIL] workspaces dir ({}): {e}", workspaces_dir.display());
            all_ok = false;
        }
    }

    check_assistant(&config.assistant.executable);

    println!();
    if all_ok {
        println!("All required checks passed!");
        ExitCode::SUCCESS
    } else {
        println!("Some required checks failed. See above for details.");
        ExitCode::FAILURE
    }
}

/// Probe the configured assistant executable. Optional: a missing or
/// misbehaving assistant is reported but never fails the overall check,
/// since a host may configure it after confirming the rest of the setup.
fn check_assistant(executable: &std::path::Path) {
    match std::process::Command::new(executable).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            let version = version.lines().next().unwrap_or("unknown").trim();
            println!("[OK] assistant ({}): {version}", executable.display());
        }
        Ok(_) => {
            println!("[WARN] assistant ({}): found but returned error", executable.display());
        }
        Err(_) => {
            println!("[WARN] assistant ({}): not found", executable.display());
        }
    }
}
