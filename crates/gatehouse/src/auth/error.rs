use crate::auth::principal::PrincipalId;
use crate::db::DatabaseError;
use thiserror::Error;

/// Errors raised while resolving a principal
#[derive(Debug, Error)]
pub enum AuthError {
    /// The reference no longer resolves (account deleted)
    #[error("Principal not found: {0}")]
    PrincipalNotFound(PrincipalId),

    /// The principal store could not be queried
    #[error("Principal store error: {0}")]
    Store(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<DatabaseError> for AuthError {
    fn from(err: DatabaseError) -> Self {
        AuthError::Store(err.to_string())
    }
}
