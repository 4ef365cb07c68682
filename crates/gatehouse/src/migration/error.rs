//! Error types for migration loading and application

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or applying migrations.
///
/// Every variant is fatal at process start: the caller must not serve traffic.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration's `up` (or its ledger record) failed. Nothing after it ran.
    #[error("migration {name} failed: {source}")]
    Failed {
        name: String,
        /// Migrations applied successfully before the failure, in order
        applied: Vec<String>,
        source: rusqlite::Error,
    },

    /// Reverting a migration failed; the ledger still lists it as applied.
    #[error("reverting migration {name} failed: {source}")]
    RevertFailed {
        name: String,
        source: rusqlite::Error,
    },

    /// Two definitions share a name
    #[error("duplicate migration name: {0}")]
    DuplicateName(String),

    /// The ledger lists a migration that no definition knows about
    #[error("ledger records unknown migration: {0}")]
    UnknownApplied(String),

    /// The applied set is not a prefix of the definition order
    #[error("ledger out of order: {missing} is not applied but later migration {recorded_after} is")]
    OutOfOrder {
        missing: String,
        recorded_after: String,
    },

    /// The migration has no reverse operation
    #[error("migration {0} cannot be reverted")]
    Irreversible(String),

    /// The migrations directory could not be read
    #[error("failed to read migrations from {path}: {source}")]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The migrations directory is malformed
    #[error("invalid migration source: {0}")]
    InvalidSource(String),

    /// Database error outside of a specific migration
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The blocking migration task panicked or was cancelled
    #[error("migration task interrupted: {0}")]
    Interrupted(String),
}

impl MigrationError {
    /// Name of the migration that failed, if the failure is tied to one.
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            MigrationError::Failed { name, .. }
            | MigrationError::RevertFailed { name, .. }
            | MigrationError::Irreversible(name)
            | MigrationError::DuplicateName(name)
            | MigrationError::UnknownApplied(name) => Some(name),
            MigrationError::OutOfOrder { missing, .. } => Some(missing),
            _ => None,
        }
    }
}

/// Convenience type alias for Result with MigrationError
pub type MigrationResult<T> = Result<T, MigrationError>;
