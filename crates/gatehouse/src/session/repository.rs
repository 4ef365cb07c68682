use crate::session::domain::{SessionId, SessionRecord};
use crate::session::error::SessionResult;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Durable storage for session records.
///
/// Each call is atomic for its record. Concurrent writes to the same id are
/// not coordinated: the last save wins.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Fetch a record that has not yet expired.
    async fn load(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>>;

    /// Insert or replace a record.
    async fn save(&self, record: &SessionRecord) -> SessionResult<()>;

    /// Push back the expiry of an unchanged record.
    async fn touch(&self, id: &SessionId, expires_at: OffsetDateTime) -> SessionResult<()>;

    /// Remove a record. Removing an unknown id is not an error.
    async fn destroy(&self, id: &SessionId) -> SessionResult<()>;

    /// Delete every expired record, returning how many went.
    async fn purge_expired(&self) -> SessionResult<usize>;

    fn generate_id(&self) -> SessionId {
        SessionId::generate()
    }
}
