use crate::auth::error::AuthResult;
use crate::auth::principal::{Principal, PrincipalId};
use crate::db::Database;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

/// Lookup of principals by id.
///
/// The user store belongs to the deployment; the core only ever reads from it.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Fetch a principal, or `None` when no such account exists.
    async fn find_by_id(&self, id: PrincipalId) -> AuthResult<Option<Principal>>;
}

/// Principal store backed by the deployment's `users` table.
///
/// Expects `users(id INTEGER PRIMARY KEY, username TEXT NOT NULL,
/// display_name TEXT)`, created by the deployment's own migrations.
#[derive(Debug, Clone)]
pub struct SqlitePrincipalStore {
    db: Database,
}

impl SqlitePrincipalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PrincipalStore for SqlitePrincipalStore {
    async fn find_by_id(&self, id: PrincipalId) -> AuthResult<Option<Principal>> {
        let principal = self
            .db
            .run_blocking(move |conn| {
                conn.query_row(
                    "SELECT id, username, display_name FROM users WHERE id = ?1",
                    params![id.get()],
                    |row| {
                        Ok(Principal {
                            id: PrincipalId::new(row.get(0)?),
                            username: row.get(1)?,
                            display_name: row.get(2)?,
                        })
                    },
                )
                .optional()
            })
            .await?;
        Ok(principal)
    }
}
