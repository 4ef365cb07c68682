//! Databases, configs and route handlers used across tests.

use crate::auth::{Principal, PrincipalId};
use crate::config::GatehouseConfig;
use crate::db::Database;
use crate::migration::{MigrationSet, SqlMigration};
use crate::pipeline::{RequestContext, RouteHandler};
use async_trait::async_trait;
use axum::Json;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

pub const TEST_SECRET: &str = "test-session-secret";

/// Deployment migrations used by most tests.
pub fn user_migrations() -> MigrationSet {
    MigrationSet::from_sql(vec![
        SqlMigration::new("001_init", "CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);"),
        SqlMigration::new(
            "002_add_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL UNIQUE, display_name TEXT);",
        ),
    ])
    .expect("valid migrations")
}

/// In-memory database with the `users` table in place.
pub async fn users_database() -> Database {
    let db = Database::open(":memory:").await.expect("open db");
    db.apply_pending(user_migrations())
        .await
        .expect("migrations")
        .database()
        .clone()
}

pub async fn insert_user(db: &Database, id: i64, username: &str, display_name: Option<&str>) {
    let username = username.to_string();
    let display_name = display_name.map(str::to_string);
    db.run_blocking(move |conn| {
        conn.execute(
            "INSERT INTO users (id, username, display_name) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, username, display_name],
        )
    })
    .await
    .expect("insert user");
}

pub async fn delete_user(db: &Database, id: i64) {
    db.run_blocking(move |conn| conn.execute("DELETE FROM users WHERE id = ?1", [id]))
        .await
        .expect("delete user");
}

pub fn principal(id: i64, username: &str) -> Principal {
    Principal {
        id: PrincipalId::new(id),
        username: username.to_string(),
        display_name: None,
    }
}

/// Defaults with a secret set and no asset directories.
pub fn test_config() -> GatehouseConfig {
    let mut config = GatehouseConfig::default();
    config.session.secret = TEST_SECRET.to_string();
    config.assets.dirs.clear();
    config
}

/// Describes what the handler saw, as JSON.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

#[async_trait]
impl RouteHandler for EchoHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Response {
        Json(json!({
            "path": ctx.path(),
            "user": ctx.principal().map(|p| p.username.clone()),
            "csrf": ctx.csrf_token(),
            "flash": ctx.flash_messages().iter().map(|m| m.text.clone()).collect::<Vec<_>>(),
            "form": ctx.form().iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>(),
        }))
        .into_response()
    }
}

/// Logs in a fixed principal.
#[derive(Debug, Clone)]
pub struct LoginHandler(pub Principal);

#[async_trait]
impl RouteHandler for LoginHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Response {
        match ctx.login(&self.0) {
            Ok(()) => "logged in".into_response(),
            Err(err) => err.into_response(),
        }
    }
}

/// Records every call, in order, into a shared log.
#[derive(Debug, Clone, Default)]
pub struct CallLog(pub Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Route handler that only appends to a [`CallLog`].
#[derive(Debug, Clone)]
pub struct LoggingHandler(pub CallLog);

#[async_trait]
impl RouteHandler for LoggingHandler {
    async fn handle(&self, _ctx: &mut RequestContext) -> Response {
        self.0.push("handler");
        "ok".into_response()
    }
}
