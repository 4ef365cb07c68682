//! Shared SQLite handle and the migration barrier.
//!
//! The migration ledger and the session store live in the same database and
//! share one connection. Every blocking call runs on the blocking thread pool
//! so request handling never stalls the async runtime.
//!
//! [`Database::apply_pending`] is the only way to obtain a [`Migrated`] handle,
//! and the request pipeline can only be built from a [`Migrated`] handle. That
//! makes "migrations complete before traffic" a property of the types rather
//! than of call ordering in `main`.

use crate::migration::{MigrationError, MigrationResult, MigrationRunner, MigrationSet, MigrationStatus};
use crate::schema;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the shared database handle itself.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLite reported an error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task panicked or was cancelled
    #[error("Task execution failed: {0}")]
    Task(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Handle to the relational backend shared by the ledger and the session store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `path` and make sure the core tables exist.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn open(path: impl Into<PathBuf>) -> DatabaseResult<Self> {
        let db_path = path.into();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let mut conn = Connection::open(&db_path)?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            schema::init_schema(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| DatabaseError::Task(format!("Failed to spawn blocking task: {}", e)))??;

        log::debug!("database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Wrap an already open connection, creating the core tables if needed.
    pub fn from_connection(mut conn: Connection) -> DatabaseResult<Self> {
        schema::init_schema(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking thread pool.
    pub async fn run_blocking<F, R>(&self, f: F) -> DatabaseResult<R>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| DatabaseError::Task(e.to_string()))?
        .map_err(DatabaseError::from)
    }

    async fn run_migrations<F, R>(&self, f: F) -> MigrationResult<R>
    where
        F: FnOnce(&mut Connection) -> MigrationResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| MigrationError::Interrupted(e.to_string()))?
    }

    /// Apply every pending migration, in order, and open the gate.
    ///
    /// On failure nothing after the failing migration is attempted and the
    /// error carries the names that did get applied during this call.
    pub async fn apply_pending(self, migrations: MigrationSet) -> MigrationResult<Migrated> {
        let applied = self
            .run_migrations(move |conn| MigrationRunner::new(&migrations).apply_pending(conn))
            .await?;

        Ok(Migrated {
            database: self,
            applied,
        })
    }

    /// Applied and pending migrations, without changing anything.
    pub async fn migration_status(&self, migrations: MigrationSet) -> MigrationResult<MigrationStatus> {
        self.run_migrations(move |conn| MigrationRunner::new(&migrations).status(conn))
            .await
    }

    /// Revert the most recently applied migration. Returns its name, or `None`
    /// when the ledger is empty.
    pub async fn revert_last(&self, migrations: MigrationSet) -> MigrationResult<Option<String>> {
        self.run_migrations(move |conn| MigrationRunner::new(&migrations).revert_last(conn))
            .await
    }
}

/// A database whose schema is known to be up to date.
///
/// Only [`Database::apply_pending`] constructs this type.
#[derive(Debug, Clone)]
pub struct Migrated {
    database: Database,
    applied: Vec<String>,
}

impl Migrated {
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Migrations applied by the call that produced this handle, in order.
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::SqlMigration;

    fn three_migrations() -> MigrationSet {
        MigrationSet::from_sql(vec![
            SqlMigration::new("001_init", "CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);"),
            SqlMigration::new(
                "002_add_users",
                "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL, display_name TEXT);",
            ),
            SqlMigration::new(
                "003_add_sessions",
                "CREATE TABLE login_events (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL);",
            ),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn open_creates_core_tables() {
        let db = Database::open(":memory:").await.unwrap();
        let count: i64 = db
            .run_blocking(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('schema_migrations', 'sessions')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn apply_pending_reports_applied_names() {
        let db = Database::open(":memory:").await.unwrap();
        let migrated = db.apply_pending(three_migrations()).await.unwrap();
        assert_eq!(
            migrated.applied(),
            ["001_init", "002_add_users", "003_add_sessions"]
        );
        assert!(!migrated.is_up_to_date());

        let again = migrated
            .database()
            .clone()
            .apply_pending(three_migrations())
            .await
            .unwrap();
        assert!(again.is_up_to_date());
    }

    #[tokio::test]
    async fn failed_migration_never_yields_a_gate() {
        let db = Database::open(":memory:").await.unwrap();
        let set = MigrationSet::from_sql(vec![
            SqlMigration::new("001_init", "CREATE TABLE settings (key TEXT);"),
            SqlMigration::new("002_broken", "CREATE TABLE broken ("),
        ])
        .unwrap();

        let err = db.clone().apply_pending(set).await.unwrap_err();
        match err {
            MigrationError::Failed { name, applied, .. } => {
                assert_eq!(name, "002_broken");
                assert_eq!(applied, vec!["001_init".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn status_and_revert_round_through_the_handle() {
        let db = Database::open(":memory:").await.unwrap();
        let set = MigrationSet::from_sql(vec![
            SqlMigration::new("001_init", "CREATE TABLE settings (key TEXT);")
                .with_down("DROP TABLE settings;"),
        ])
        .unwrap();

        let status = db.migration_status(set.clone()).await.unwrap();
        assert_eq!(status.pending, vec!["001_init".to_string()]);

        let migrated = db.apply_pending(set.clone()).await.unwrap();
        let db = migrated.database().clone();
        assert_eq!(
            db.revert_last(set.clone()).await.unwrap().as_deref(),
            Some("001_init")
        );
        assert_eq!(db.revert_last(set).await.unwrap(), None);
    }
}
