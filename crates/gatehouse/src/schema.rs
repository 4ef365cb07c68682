//! Tables owned by this crate.
//!
//! The migration ledger and the session table are created here, outside of
//! the ledger itself, so that the runner can always read its own state.
//! Deployment tables (users and friends) come from migration definitions.

use rusqlite::Connection;

pub const LEDGER_TABLE: &str = "schema_migrations";
pub const SESSIONS_TABLE: &str = "sessions";

/// Create the ledger and session tables if they do not exist yet.
pub fn init_schema(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        -- One row per successfully applied migration.
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY NOT NULL,
            applied_at TEXT NOT NULL
        );

        -- Server-side session state. expires_at is a unix timestamp (seconds).
        CREATE TABLE IF NOT EXISTS sessions (
            sid TEXT PRIMARY KEY NOT NULL,
            data TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
        "#,
    )?;

    Ok(())
}
