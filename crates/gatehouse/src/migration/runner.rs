//! Applies pending migrations in order against the ledger.

use crate::migration::definition::{Migration, MigrationSet};
use crate::migration::error::{MigrationError, MigrationResult};
use crate::migration::ledger::{MigrationLedger, MigrationRecord, SqliteLedger};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::{error, info, instrument};

/// Snapshot of the ledger relative to the known definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<String>,
}

/// Runs migrations from a [`MigrationSet`] against a [`MigrationLedger`].
///
/// Each migration's `up` and its ledger record are committed in a single
/// `BEGIN IMMEDIATE` transaction: either both land or neither does. The first
/// failure stops the run.
pub struct MigrationRunner<'a, L = SqliteLedger> {
    migrations: &'a MigrationSet,
    ledger: L,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(migrations: &'a MigrationSet) -> Self {
        Self::with_ledger(migrations, SqliteLedger)
    }
}

impl<'a, L: MigrationLedger> MigrationRunner<'a, L> {
    pub fn with_ledger(migrations: &'a MigrationSet, ledger: L) -> Self {
        Self { migrations, ledger }
    }

    /// Ledger records, validated against the definitions.
    pub fn executed(&self, conn: &Connection) -> MigrationResult<Vec<MigrationRecord>> {
        let records = self.ledger.applied(conn)?;
        self.check_ledger(&records)?;
        Ok(records)
    }

    /// Names of definitions not yet applied, in the order they would run.
    pub fn pending(&self, conn: &Connection) -> MigrationResult<Vec<String>> {
        let records = self.ledger.applied(conn)?;
        let done = self.check_ledger(&records)?;
        Ok(self
            .migrations
            .names()
            .skip(done)
            .map(str::to_string)
            .collect())
    }

    pub fn status(&self, conn: &Connection) -> MigrationResult<MigrationStatus> {
        let records = self.ledger.applied(conn)?;
        let done = self.check_ledger(&records)?;
        let pending = self
            .migrations
            .names()
            .skip(done)
            .map(str::to_string)
            .collect();
        Ok(MigrationStatus {
            applied: records,
            pending,
        })
    }

    /// Apply every pending migration in definition order.
    ///
    /// Returns the names applied by this call; an empty list means the
    /// database was already up to date. On failure, returns
    /// [`MigrationError::Failed`] naming the failing migration and listing
    /// the ones applied before it.
    #[instrument(name = "migrations.apply_pending", skip_all, fields(known = self.migrations.len()))]
    pub fn apply_pending(&self, conn: &mut Connection) -> MigrationResult<Vec<String>> {
        let records = self.ledger.applied(conn)?;
        let done = self.check_ledger(&records)?;

        let mut applied = Vec::new();
        for migration in self.migrations.iter().skip(done) {
            let name = migration.name().to_string();
            info!(migration = %name, "applying migration");

            if let Err(source) = self.apply_one(conn, migration.as_ref()) {
                error!(migration = %name, error = %source, "migration failed");
                return Err(MigrationError::Failed {
                    name,
                    applied,
                    source,
                });
            }
            applied.push(name);
        }

        Ok(applied)
    }

    fn apply_one(&self, conn: &mut Connection, migration: &dyn Migration) -> rusqlite::Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        migration.up(&tx)?;
        self.ledger
            .record(&tx, migration.name(), OffsetDateTime::now_utc())?;
        tx.commit()
    }

    /// Revert the most recently applied migration.
    pub fn revert_last(&self, conn: &mut Connection) -> MigrationResult<Option<String>> {
        let records = self.ledger.applied(conn)?;
        let done = self.check_ledger(&records)?;
        let Some(migration) = done.checked_sub(1).and_then(|idx| self.migrations.iter().nth(idx)) else {
            return Ok(None);
        };

        let name = migration.name().to_string();
        if !migration.is_reversible() {
            return Err(MigrationError::Irreversible(name));
        }

        info!(migration = %name, "reverting migration");
        match self.revert_one(conn, migration.as_ref()) {
            Ok(()) => Ok(Some(name)),
            Err(source) => {
                error!(migration = %name, error = %source, "revert failed");
                Err(MigrationError::RevertFailed { name, source })
            }
        }
    }

    fn revert_one(&self, conn: &mut Connection, migration: &dyn Migration) -> rusqlite::Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        migration.down(&tx)?;
        self.ledger.remove(&tx, migration.name())?;
        tx.commit()
    }

    /// Check that the applied names are a prefix of the definition order and
    /// return the length of that prefix.
    fn check_ledger(&self, records: &[MigrationRecord]) -> MigrationResult<usize> {
        let applied: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();

        if let Some(unknown) = records
            .iter()
            .find(|r| self.migrations.get(&r.name).is_none())
        {
            return Err(MigrationError::UnknownApplied(unknown.name.clone()));
        }

        let done = self
            .migrations
            .names()
            .take_while(|name| applied.contains(name))
            .count();

        if let Some(later) = self
            .migrations
            .names()
            .skip(done)
            .find(|name| applied.contains(name))
        {
            let missing = self
                .migrations
                .names()
                .nth(done)
                .unwrap_or_default()
                .to_string();
            return Err(MigrationError::OutOfOrder {
                missing,
                recorded_after: later.to_string(),
            });
        }

        Ok(done)
    }
}
