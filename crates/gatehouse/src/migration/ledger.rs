//! Durable record of applied migrations.

use rusqlite::{Connection, params};
use time::OffsetDateTime;

/// A migration that has been applied successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub name: String,
    pub applied_at: OffsetDateTime,
}

/// Storage for [`MigrationRecord`]s.
///
/// Methods take the connection explicitly so the runner can call them inside
/// the same transaction as the migration itself.
pub trait MigrationLedger: Send + Sync {
    /// All records, ordered by name
    fn applied(&self, conn: &Connection) -> rusqlite::Result<Vec<MigrationRecord>>;

    fn record(&self, conn: &Connection, name: &str, applied_at: OffsetDateTime) -> rusqlite::Result<()>;

    /// Remove a record. Returns whether one existed.
    fn remove(&self, conn: &Connection, name: &str) -> rusqlite::Result<bool>;
}

/// Ledger backed by the `schema_migrations` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteLedger;

impl MigrationLedger for SqliteLedger {
    fn applied(&self, conn: &Connection) -> rusqlite::Result<Vec<MigrationRecord>> {
        let mut stmt = conn.prepare("SELECT name, applied_at FROM schema_migrations ORDER BY name ASC")?;
        let records = stmt.query_map([], |row| {
            Ok(MigrationRecord {
                name: row.get(0)?,
                applied_at: row.get(1)?,
            })
        })?;
        records.collect()
    }

    fn record(&self, conn: &Connection, name: &str, applied_at: OffsetDateTime) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
            params![name, applied_at],
        )?;
        Ok(())
    }

    fn remove(&self, conn: &Connection, name: &str) -> rusqlite::Result<bool> {
        let affected = conn.execute("DELETE FROM schema_migrations WHERE name = ?1", params![name])?;
        Ok(affected > 0)
    }
}
