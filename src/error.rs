//! Error taxonomy shared by the store boundary, the completion engine and the migration runner.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or disallowed input fields.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// The row changed between the rescan and the write, and the single retry was exhausted.
    #[error("{entity} {id} was modified concurrently; aggregate write abandoned")]
    Conflict { entity: &'static str, id: u64 },

    #[error("unknown migration '{0}'")]
    UnknownMigration(String),

    #[error("migration '{name}' failed on {failed} phase(s) ({applied} applied)")]
    PartialMigrationFailure {
        name: String,
        failed: usize,
        applied: usize,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: u64) -> Self {
        Error::NotFound { entity, id }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::StoreUnavailable(format!("data file is not valid JSON: {err}"))
    }
}
