use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Installation tracker: task completion, phase/project progress and structural migrations.
/// Storage defaults to ~/.itrack/portal.json or a path passed via --db.
#[derive(Parser)]
#[command(name = "itrack", version, about = "Installation progress tracker")]
pub struct Cli {
    /// Path to the JSON data file.
    #[arg(long, global = true, env = "ITRACK_DB")]
    pub db: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}
