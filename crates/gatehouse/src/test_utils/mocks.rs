//! Mock implementations for testing

use crate::auth::{AuthResult, Principal, PrincipalId, PrincipalStore};
use crate::session::{SessionId, SessionRecord, SessionRepository, SessionResult};
use async_trait::async_trait;
use mockall::mock;
use time::OffsetDateTime;

// ============================================================================
// MockSessionRepository
// ============================================================================

mock! {
    pub SessionRepository {}

    #[async_trait]
    impl SessionRepository for SessionRepository {
        async fn load(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>>;
        async fn save(&self, record: &SessionRecord) -> SessionResult<()>;
        async fn touch(&self, id: &SessionId, expires_at: OffsetDateTime) -> SessionResult<()>;
        async fn destroy(&self, id: &SessionId) -> SessionResult<()>;
        async fn purge_expired(&self) -> SessionResult<usize>;
    }
}

// ============================================================================
// MockPrincipalStore
// ============================================================================

mock! {
    pub PrincipalStore {}

    #[async_trait]
    impl PrincipalStore for PrincipalStore {
        async fn find_by_id(&self, id: PrincipalId) -> AuthResult<Option<Principal>>;
    }
}
