//! Loads the session before the request and writes it back afterwards.

use crate::pipeline::context::RequestContext;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::{Flow, Stage};
use crate::session::{Session, SessionCookie, SessionError, SessionId, SessionRepository};
use async_trait::async_trait;
use axum::response::Response;
use http::header::SET_COOKIE;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Session lookup and persistence around the rest of the pipeline.
///
/// A missing, unsigned or expired cookie starts a new session, which is
/// stored and sent back even if nothing was put in it. An existing session is
/// rewritten only when it changed; otherwise its expiry is pushed back.
pub struct SessionStage {
    store: Arc<dyn SessionRepository>,
    cookie: SessionCookie,
    idle_timeout: Duration,
    degrade_to_anonymous: bool,
}

impl std::fmt::Debug for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStage")
            .field("cookie", &self.cookie.name())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionStage {
    pub fn new(store: Arc<dyn SessionRepository>, cookie: SessionCookie, idle_timeout: Duration) -> Self {
        Self {
            store,
            cookie,
            idle_timeout,
            degrade_to_anonymous: false,
        }
    }

    /// Serve with a throwaway session instead of failing when the store is down.
    pub fn degrade_to_anonymous(mut self, degrade: bool) -> Self {
        self.degrade_to_anonymous = degrade;
        self
    }

    fn expires_at(&self) -> StageResult<OffsetDateTime> {
        time::Duration::try_from(self.idle_timeout)
            .ok()
            .and_then(|idle| OffsetDateTime::now_utc().checked_add(idle))
            .ok_or_else(|| {
                StageError::Internal(format!("idle timeout {:?} is out of range", self.idle_timeout))
            })
    }

    async fn resolve(&self, id: Option<SessionId>) -> StageResult<Session> {
        let Some(id) = id else {
            return Ok(Session::fresh(self.store.generate_id()));
        };

        match self.store.load(&id).await {
            Ok(Some(record)) => Ok(Session::from_record(record)),
            Ok(None) => {
                debug!("session cookie did not match a live session");
                Ok(Session::fresh(self.store.generate_id()))
            }
            Err(err) if !err.is_unavailable() => {
                warn!(error = %err, "discarding unreadable session");
                Ok(Session::fresh(self.store.generate_id()))
            }
            Err(err) if self.degrade_to_anonymous => {
                warn!(error = %err, "session store unavailable, serving without a session");
                Ok(Session::ephemeral(self.store.generate_id()))
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    fn set_cookie(&self, response: &mut Response, value: StageResult<http::HeaderValue>) -> StageResult<()> {
        response.headers_mut().append(SET_COOKIE, value?);
        Ok(())
    }
}

fn unavailable(err: SessionError) -> StageError {
    StageError::SessionUnavailable(err.to_string())
}

fn cookie_error(err: SessionError) -> StageError {
    StageError::Internal(err.to_string())
}

#[async_trait]
impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn before(&self, ctx: &mut RequestContext) -> StageResult<Flow> {
        let id = self.cookie.read(ctx.headers());
        let session = self.resolve(id).await?;
        ctx.set_session(session);
        ctx.set_session_ids(self.store.clone());
        Ok(Flow::Continue)
    }

    async fn after(&self, ctx: &mut RequestContext, response: &mut Response) -> StageResult<()> {
        let Some(mut session) = ctx.take_session() else {
            return Ok(());
        };
        if session.is_ephemeral() {
            return Ok(());
        }

        if let Some(replaced) = session.take_replaced() {
            self.store.destroy(&replaced).await.map_err(unavailable)?;
        }

        if session.is_destroyed() {
            if !session.is_fresh() {
                self.store.destroy(session.id()).await.map_err(unavailable)?;
            }
            return self.set_cookie(response, self.cookie.expire().map_err(cookie_error));
        }

        if session.needs_save() {
            let record = session.to_record(self.expires_at()?);
            self.store.save(&record).await.map_err(unavailable)?;
            if session.is_fresh() || self.cookie.has_max_age() {
                self.set_cookie(response, self.cookie.issue(session.id()).map_err(cookie_error))?;
            }
            return Ok(());
        }

        if let Err(err) = self.store.touch(session.id(), self.expires_at()?).await {
            warn!(error = %err, "failed to extend session expiry");
        }
        if self.cookie.has_max_age() {
            self.set_cookie(response, self.cookie.issue(session.id()).map_err(cookie_error))?;
        }
        Ok(())
    }
}
