//! Runtime configuration resolved from command-line flags and the environment.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::Result;

const DATA_DIR: &str = ".itrack";
const DATA_FILE: &str = "portal.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// JSON data file backing the store.
    pub db_path: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Config {
    /// Resolve the data file: `--db`/`ITRACK_DB` if given, else `$HOME/.itrack/portal.json`.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let db_path = match cli.db.as_ref() {
            Some(path) => path.clone(),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                let dir = PathBuf::from(home).join(DATA_DIR);
                std::fs::create_dir_all(&dir)?;
                dir.join(DATA_FILE)
            }
        };
        Ok(Config { db_path, log_level: cli.log_level.clone() })
    }
}
