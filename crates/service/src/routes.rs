//! Demo routes served behind the pipeline.

use async_trait::async_trait;
use axum::Json;
use axum::response::{IntoResponse, Redirect, Response};
use gatehouse::{
    Database, FlashKind, GatehouseBuilder, Principal, PrincipalId, RequestContext, RouteHandler,
    StageError, error_response,
};
use http::{Method, StatusCode};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::{info, warn};

pub fn install(builder: GatehouseBuilder, database: Database) -> GatehouseBuilder {
    builder
        .route(Method::GET, "/", Home)
        .route(Method::GET, "/healthz", Health)
        .route(Method::POST, "/login", Login { database })
        .route(Method::POST, "/logout", Logout)
}

/// Who is signed in, the token for the next form post and pending flash.
struct Home;

#[async_trait]
impl RouteHandler for Home {
    async fn handle(&self, ctx: &mut RequestContext) -> Response {
        let flash: Vec<_> = ctx
            .flash_messages()
            .iter()
            .map(|m| json!({ "kind": m.kind.as_str(), "text": m.text }))
            .collect();
        let user = ctx.principal().map(|p| {
            json!({
                "id": p.id.get(),
                "username": p.username,
                "display_name": p.display_name,
            })
        });

        Json(json!({
            "user": user,
            "csrf_token": ctx.csrf_token(),
            "flash": flash,
        }))
        .into_response()
    }
}

struct Health;

#[async_trait]
impl RouteHandler for Health {
    async fn handle(&self, _ctx: &mut RequestContext) -> Response {
        "ok".into_response()
    }
}

/// Signs in the `users` row named by the `username` form field.
///
/// There are no passwords here; credential checks belong to the application.
struct Login {
    database: Database,
}

impl Login {
    async fn find(&self, username: String) -> Result<Option<Principal>, StageError> {
        self.database
            .run_blocking(move |conn| {
                conn.query_row(
                    "SELECT id, username, display_name FROM users WHERE username = ?1",
                    [&username],
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
            .await
            .map_err(|e| StageError::Internal(e.to_string()))
    }
}

#[async_trait]
impl RouteHandler for Login {
    async fn handle(&self, ctx: &mut RequestContext) -> Response {
        let Some(username) = ctx.form().get("username").map(str::to_string) else {
            return error_response(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "username is required",
            );
        };

        let principal = match self.find(username).await {
            Ok(Some(principal)) => principal,
            Ok(None) => {
                ctx.flash(FlashKind::Error, "Unknown user");
                return Redirect::to("/").into_response();
            }
            Err(err) => {
                warn!(error = %err, "user lookup failed");
                return err.into_response();
            }
        };

        if let Err(err) = ctx.login(&principal) {
            return err.into_response();
        }
        info!(user = %principal.username, "signed in");
        ctx.flash(FlashKind::Success, format!("Welcome, {}", principal.username));
        Redirect::to("/").into_response()
    }
}

struct Logout;

#[async_trait]
impl RouteHandler for Logout {
    async fn handle(&self, ctx: &mut RequestContext) -> Response {
        ctx.logout();
        Redirect::to("/").into_response()
    }
}
