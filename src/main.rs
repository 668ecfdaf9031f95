//! # itrack - Installation Tracker
//!
//! Tracks fibre and equipment installations across a fixed three-level hierarchy:
//! **Project → Phase → Task**. Property managers and administrators tick off tasks; the
//! tracker keeps every derived value consistent with the tasks that define it.
//!
//! ## What it guarantees
//!
//! - **Phase status** is a pure function of the phase's tasks: nothing done is
//!   `not_started` (including an empty phase), everything done is `completed`, anything in
//!   between is `in_progress`.
//! - **Project progress** is `round(100 * completed / total)` over every task of every phase,
//!   recomputed by full rescan after each change.
//! - **Activity log** gets exactly one entry per genuine completion; re-saving a completed
//!   task changes nothing.
//! - **Migrations** insert a task into every matching phase, shifting later tasks down, and
//!   can be re-run any number of times without duplicating anything.
//!
//! ## Quick Start
//!
//! ```bash
//! itrack project add "Harbour View"
//! itrack phase add --project 1 --number 1 "Survey"
//! itrack task add --phase 1 "[PM] Approve survey date"
//! itrack task complete 1
//! itrack task update 1 --set '{"completed": true}' --actor admin
//! itrack migrate run pm-access-date
//! ```
//!
//! Data is stored in `~/.itrack/portal.json` unless `--db` or `ITRACK_DB` says otherwise.
//! Set `RUST_LOG` (or `--log-level`) to see what the engine is doing.

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod activity;
pub mod cli;
pub mod cmd;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod fields;
pub mod migration;
pub mod progress;
pub mod project;
pub mod status;
pub mod store;
pub mod task;

use cli::Cli;
use cmd::*;
use config::Config;
use db::FileStore;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to install log subscriber; continuing without logs");
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to prepare data directory: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&config.log_level);

    // Completions never touch the data file.
    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return;
    }

    let mut store = match FileStore::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open {}: {e}", config.db_path.display());
            std::process::exit(1);
        }
    };
    tracing::debug!(db = %config.db_path.display(), "store opened");

    match cli.command {
        Commands::Project { action } => cmd_project(&mut store, action),
        Commands::Phase { action } => cmd_phase(&mut store, action),
        Commands::Task { action } => cmd_task(&mut store, action),
        Commands::Refresh { project } => cmd_refresh(&mut store, project),
        Commands::Activity { project } => cmd_activity(&mut store, project),
        Commands::Migrate { action } => cmd_migrate(&mut store, action),
        Commands::Completions { .. } => unreachable!("completions handled above"),
    }
}
