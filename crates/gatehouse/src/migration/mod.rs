//! Schema migrations: definitions, the ledger of applied names, and the runner.

pub mod definition;
pub mod error;
pub mod ledger;
pub mod runner;

pub use definition::{Migration, MigrationSet, SqlMigration};
pub use error::{MigrationError, MigrationResult};
pub use ledger::{MigrationLedger, MigrationRecord, SqliteLedger};
pub use runner::{MigrationRunner, MigrationStatus};
