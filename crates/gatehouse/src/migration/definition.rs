//! Migration definitions.
//!
//! Definitions are owned by the deployment and read-only to the runner. A
//! [`MigrationSet`] fixes their order: lexicographic by name, so a numeric or
//! timestamp prefix (`001_init`, `002_add_users`) decides what runs first.

use crate::migration::error::{MigrationError, MigrationResult};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// A named, ordered schema change.
///
/// `up` and `down` run inside the runner's transaction; they must not commit
/// or roll back on their own. Migrations should be written to be idempotent
/// (`IF NOT EXISTS` and friends): the runner records them atomically, but an
/// operator restoring a database from backup can still replay one.
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    fn up(&self, conn: &Connection) -> rusqlite::Result<()>;

    fn down(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

/// A migration expressed as SQL batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    name: String,
    up_sql: String,
    down_sql: Option<String>,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>, up_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: None,
        }
    }

    pub fn with_down(mut self, down_sql: impl Into<String>) -> Self {
        self.down_sql = Some(down_sql.into());
        self
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&self.up_sql)
    }

    fn down(&self, conn: &Connection) -> rusqlite::Result<()> {
        match &self.down_sql {
            Some(sql) => conn.execute_batch(sql),
            None => Ok(()),
        }
    }

    fn is_reversible(&self) -> bool {
        self.down_sql.is_some()
    }
}

/// The ordered list of known migrations.
#[derive(Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Arc<dyn Migration>>,
}

impl std::fmt::Debug for MigrationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl MigrationSet {
    /// Build a set, sorting by name and rejecting duplicates.
    pub fn new(mut migrations: Vec<Arc<dyn Migration>>) -> MigrationResult<Self> {
        migrations.sort_by(|a, b| a.name().cmp(b.name()));

        for pair in migrations.windows(2) {
            if pair[0].name() == pair[1].name() {
                return Err(MigrationError::DuplicateName(pair[0].name().to_string()));
            }
        }
        if let Some(empty) = migrations.iter().find(|m| m.name().trim().is_empty()) {
            return Err(MigrationError::InvalidSource(format!(
                "migration with empty name: {:?}",
                empty.name()
            )));
        }

        Ok(Self { migrations })
    }

    pub fn from_sql(migrations: impl IntoIterator<Item = SqlMigration>) -> MigrationResult<Self> {
        Self::new(
            migrations
                .into_iter()
                .map(|m| Arc::new(m) as Arc<dyn Migration>)
                .collect(),
        )
    }

    /// Load `NAME.up.sql` and optional `NAME.down.sql` files from `dir`.
    ///
    /// Other files are ignored. A `.down.sql` without a matching `.up.sql` is
    /// an error.
    pub fn from_dir(dir: impl AsRef<Path>) -> MigrationResult<Self> {
        let dir = dir.as_ref();
        let source_err = |source| MigrationError::Source {
            path: dir.to_path_buf(),
            source,
        };

        let mut found: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
        for entry in std::fs::read_dir(dir).map_err(source_err)? {
            let entry = entry.map_err(source_err)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(name) = file_name.strip_suffix(UP_SUFFIX) {
                let sql = std::fs::read_to_string(&path).map_err(|source| MigrationError::Source {
                    path: path.clone(),
                    source,
                })?;
                found.entry(name.to_string()).or_default().0 = Some(sql);
            } else if let Some(name) = file_name.strip_suffix(DOWN_SUFFIX) {
                let sql = std::fs::read_to_string(&path).map_err(|source| MigrationError::Source {
                    path: path.clone(),
                    source,
                })?;
                found.entry(name.to_string()).or_default().1 = Some(sql);
            }
        }

        let mut migrations = Vec::with_capacity(found.len());
        for (name, (up, down)) in found {
            let Some(up) = up else {
                return Err(MigrationError::InvalidSource(format!(
                    "{name}{DOWN_SUFFIX} has no matching {name}{UP_SUFFIX}"
                )));
            };
            let mut migration = SqlMigration::new(name, up);
            if let Some(down) = down {
                migration = migration.with_down(down);
            }
            migrations.push(migration);
        }

        log::debug!("loaded {} migrations from {}", migrations.len(), dir.display());
        Self::from_sql(migrations)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(|m| m.name())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Migration>> {
        self.migrations.iter().find(|m| m.name() == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.name() == name)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn sorts_by_name_regardless_of_input_order() {
        let set = MigrationSet::from_sql(vec![
            SqlMigration::new("003_add_sessions", "SELECT 1;"),
            SqlMigration::new("001_init", "SELECT 1;"),
            SqlMigration::new("002_add_users", "SELECT 1;"),
        ])
        .unwrap();

        let names: Vec<_> = set.names().collect();
        assert_eq!(names, vec!["001_init", "002_add_users", "003_add_sessions"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = MigrationSet::from_sql(vec![
            SqlMigration::new("001_init", "SELECT 1;"),
            SqlMigration::new("001_init", "SELECT 2;"),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateName(name) if name == "001_init"));
    }

    #[test]
    fn reversibility_follows_down_sql() {
        let plain = SqlMigration::new("001_init", "SELECT 1;");
        assert!(!plain.is_reversible());
        assert!(plain.with_down("SELECT 2;").is_reversible());
    }

    #[test]
    fn loads_up_and_down_files_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("002_add_users.up.sql"), "CREATE TABLE users (id INTEGER);").unwrap();
        fs::write(dir.path().join("002_add_users.down.sql"), "DROP TABLE users;").unwrap();
        fs::write(dir.path().join("001_init.up.sql"), "CREATE TABLE settings (key TEXT);").unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let set = MigrationSet::from_dir(dir.path()).unwrap();
        let names: Vec<_> = set.names().collect();
        assert_eq!(names, vec!["001_init", "002_add_users"]);
        assert!(!set.get("001_init").unwrap().is_reversible());
        assert!(set.get("002_add_users").unwrap().is_reversible());
    }

    #[test]
    fn orphaned_down_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001_init.down.sql"), "DROP TABLE settings;").unwrap();

        let err = MigrationSet::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidSource(_)));
    }

    #[test]
    fn missing_dir_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MigrationSet::from_dir(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, MigrationError::Source { .. }));
    }
}
