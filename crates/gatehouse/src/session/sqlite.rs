//! SQLite-backed session store.

use crate::db::Database;
use crate::session::domain::{SessionData, SessionId, SessionRecord};
use crate::session::error::{SessionError, SessionResult};
use crate::session::repository::SessionRepository;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn to_unix(at: OffsetDateTime) -> i64 {
    at.unix_timestamp()
}

#[async_trait]
impl SessionRepository for SqliteSessionStore {
    async fn load(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>> {
        let sid = id.as_str().to_string();
        let now = to_unix(OffsetDateTime::now_utc());
        let row = self
            .db
            .run_blocking(move |conn| {
                conn.query_row(
                    "SELECT data, expires_at FROM sessions WHERE sid = ?1 AND expires_at > ?2",
                    params![sid, now],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
            })
            .await?;

        let Some((data_json, expires_at)) = row else {
            return Ok(None);
        };

        let data: SessionData = serde_json::from_str(&data_json)?;
        let expires_at = OffsetDateTime::from_unix_timestamp(expires_at)
            .map_err(|e| SessionError::SerializationError(e.to_string()))?;
        Ok(Some(SessionRecord::new(id.clone(), data, expires_at)))
    }

    async fn save(&self, record: &SessionRecord) -> SessionResult<()> {
        let sid = record.id.as_str().to_string();
        let data_json = serde_json::to_string(&record.data)?;
        let expires_at = to_unix(record.expires_at);
        let updated_at = OffsetDateTime::now_utc();

        self.db
            .run_blocking(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (sid, data, expires_at, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(sid) DO UPDATE SET
                        data = excluded.data,
                        expires_at = excluded.expires_at,
                        updated_at = excluded.updated_at",
                    params![sid, data_json, expires_at, updated_at],
                )
            })
            .await?;
        Ok(())
    }

    async fn touch(&self, id: &SessionId, expires_at: OffsetDateTime) -> SessionResult<()> {
        let sid = id.as_str().to_string();
        let expires_at = to_unix(expires_at);
        let updated_at = OffsetDateTime::now_utc();

        self.db
            .run_blocking(move |conn| {
                conn.execute(
                    "UPDATE sessions SET expires_at = ?2, updated_at = ?3 WHERE sid = ?1",
                    params![sid, expires_at, updated_at],
                )
            })
            .await?;
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> SessionResult<()> {
        let sid = id.as_str().to_string();
        self.db
            .run_blocking(move |conn| conn.execute("DELETE FROM sessions WHERE sid = ?1", params![sid]))
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> SessionResult<usize> {
        let now = to_unix(OffsetDateTime::now_utc());
        let purged = self
            .db
            .run_blocking(move |conn| {
                conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
            })
            .await?;
        if purged > 0 {
            log::debug!("purged {} expired sessions", purged);
        }
        Ok(purged)
    }
}

/// Periodically delete expired sessions until the returned handle is aborted.
pub fn spawn_purge_task(store: Arc<dyn SessionRepository>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.purge_expired().await {
                    log::warn!("session purge failed: {}", e);
                }
            }
        }
        .instrument(info_span!("sessions.purge", every = ?every)),
    )
}
