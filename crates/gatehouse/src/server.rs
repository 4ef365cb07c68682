//! The orchestrator: wires the stages in their fixed order around the
//! application's routes and serves them.

use crate::auth::{PrincipalSerializer, PrincipalStore, SqlitePrincipalStore};
use crate::config::{ConfigError, GatehouseConfig};
use crate::db::Migrated;
use crate::pipeline::stages::{
    AccessLogFormat, AccessLogStage, AuthenticationStage, CompressionStage, CsrfStage, FlashStage,
    FormBodyStage, SecurityHeadersStage, SessionStage, StaticAssetsStage,
};
use crate::pipeline::{Pipeline, RequestContext, RouteHandler, Routes, StageError};
use crate::session::{
    CookieSigner, SessionCookie, SessionError, SessionRepository, SqliteSessionStore,
    spawn_purge_task,
};
use axum::Router;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::Method;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to build pipeline: {0}")]
    Pipeline(#[from] StageError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Assembles a [`Gatehouse`] from a migrated database.
///
/// Requiring [`Migrated`] here means no request can be served until every
/// pending migration has been applied.
pub struct GatehouseBuilder {
    migrated: Migrated,
    config: GatehouseConfig,
    routes: Routes,
    session_store: Option<Arc<dyn SessionRepository>>,
    principal_store: Option<Arc<dyn PrincipalStore>>,
}

impl GatehouseBuilder {
    pub fn route(mut self, method: Method, path: &str, handler: impl RouteHandler + 'static) -> Self {
        self.routes = self.routes.route(method, path, Arc::new(handler));
        self
    }

    /// Handler for paths with no route; defaults to a JSON 404.
    pub fn fallback(mut self, handler: impl RouteHandler + 'static) -> Self {
        self.routes = self.routes.fallback(Arc::new(handler));
        self
    }

    /// Replace the SQLite session store.
    pub fn session_store(mut self, store: Arc<dyn SessionRepository>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Replace the `users`-table principal store.
    pub fn principal_store(mut self, store: Arc<dyn PrincipalStore>) -> Self {
        self.principal_store = Some(store);
        self
    }

    pub fn build(self) -> ServerResult<Gatehouse> {
        let config = self.config;
        config.validate()?;

        let db = self.migrated.database().clone();
        let session_store = self
            .session_store
            .unwrap_or_else(|| Arc::new(SqliteSessionStore::new(db.clone())));
        let principal_store = self
            .principal_store
            .unwrap_or_else(|| Arc::new(SqlitePrincipalStore::new(db)));

        let cookie = SessionCookie::new(
            config.session.cookie_name.clone(),
            CookieSigner::new(config.session.secret.as_bytes())?,
        )
        .secure(config.server.https)
        .max_age(config.session.cookie_max_age);

        let access_log = if config.server.production {
            AccessLogFormat::Combined
        } else {
            AccessLogFormat::Dev
        };

        let security_headers = SecurityHeadersStage::new(&config.security)?;
        let pipeline = Pipeline::default()
            .with_stage(CompressionStage::new(config.compression.clone()))
            .with_stage(StaticAssetsStage::new(config.assets.dirs.clone()))
            .with_stage(AccessLogStage::new(access_log))
            .with_stage(security_headers.clone())
            .with_stage(FormBodyStage::new(&config.body))
            .with_stage(
                SessionStage::new(session_store.clone(), cookie, config.session.idle_timeout)
                    .degrade_to_anonymous(config.session.degrade_to_anonymous),
            )
            .with_stage(FlashStage)
            .with_stage(CsrfStage)
            .with_stage(AuthenticationStage::new(PrincipalSerializer::new(principal_store)));

        info!(stages = ?pipeline, routes = self.routes.len(), "request pipeline ready");

        Ok(Gatehouse {
            inner: Arc::new(Inner {
                config,
                pipeline,
                routes: self.routes,
                session_store,
                security_headers,
            }),
        })
    }
}

struct Inner {
    config: GatehouseConfig,
    pipeline: Pipeline,
    routes: Routes,
    session_store: Arc<dyn SessionRepository>,
    /// Also applied to responses produced outside the pipeline
    security_headers: SecurityHeadersStage,
}

/// A ready-to-serve request pipeline.
#[derive(Clone)]
pub struct Gatehouse {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Gatehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatehouse")
            .field("pipeline", &self.inner.pipeline)
            .field("routes", &self.inner.routes)
            .finish_non_exhaustive()
    }
}

impl Gatehouse {
    pub fn builder(migrated: Migrated, config: GatehouseConfig) -> GatehouseBuilder {
        GatehouseBuilder {
            migrated,
            config,
            routes: Routes::new(),
            session_store: None,
            principal_store: None,
        }
    }

    pub fn config(&self) -> &GatehouseConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Run one request through the pipeline under the request timeout.
    ///
    /// Dropping the returned future (client gone) cancels every stage.
    pub async fn handle(&self, request: Request) -> Response {
        let ctx = RequestContext::new(request);
        let timeout = self.inner.config.server.request_timeout;
        match tokio::time::timeout(timeout, self.inner.pipeline.run(ctx, &self.inner.routes)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(?timeout, "request timed out");
                let mut response = StageError::Timeout.into_response();
                self.inner.security_headers.apply(response.headers_mut());
                response
            }
        }
    }

    /// An axum router that sends every request through [`Gatehouse::handle`].
    pub fn router(&self) -> Router {
        let gatehouse = self.clone();
        Router::new().fallback(move |request: Request| {
            let gatehouse = gatehouse.clone();
            async move { gatehouse.handle(request).await }
        })
    }

    /// Start deleting expired sessions every `session.purge_interval`.
    pub fn spawn_session_purge(&self) -> JoinHandle<()> {
        spawn_purge_task(
            self.inner.session_store.clone(),
            self.inner.config.session.purge_interval,
        )
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let purge = self.spawn_session_purge();
        let app = self.router();

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        purge.abort();
        info!("server stopped");
        result.map_err(ServerError::from)
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
