//! Startup orchestration and session-backed authentication.
//!
//! A process built on this crate opens its [`Database`], applies every pending
//! migration through [`Database::apply_pending`], and only then constructs a
//! [`Gatehouse`] from the resulting [`Migrated`] handle. The gatehouse owns the
//! fixed-order request pipeline (compression, static assets, access log,
//! security headers, form bodies, sessions, flash, CSRF, authentication) in
//! front of externally supplied route handlers.

pub mod auth;
pub mod config;
pub mod db;
pub mod migration;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod session;

#[cfg(test)]
pub mod test_utils;

pub use auth::{Authentication, Principal, PrincipalId, PrincipalStore};
pub use config::{ConfigError, GatehouseConfig, LogConfig};
pub use db::{Database, DatabaseError, Migrated};
pub use migration::{Migration, MigrationError, MigrationSet, MigrationStatus, SqlMigration};
pub use pipeline::stages::ACCESS_LOG_TARGET;
pub use pipeline::{RequestContext, RouteHandler, StageError, error_response};
pub use server::{Gatehouse, GatehouseBuilder, ServerError, shutdown_signal};
pub use session::{FlashKind, FlashMessage};
