//! Converts between a principal and the reference a session keeps.

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::principal::{Principal, PrincipalReference};
use crate::auth::store::PrincipalStore;
use std::sync::Arc;

/// Keeps only the principal's id in the session and rehydrates it per request.
#[derive(Clone)]
pub struct PrincipalSerializer {
    store: Arc<dyn PrincipalStore>,
}

impl std::fmt::Debug for PrincipalSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalSerializer").finish_non_exhaustive()
    }
}

impl PrincipalSerializer {
    pub fn new(store: Arc<dyn PrincipalStore>) -> Self {
        Self { store }
    }

    pub fn serialize(&self, principal: &Principal) -> PrincipalReference {
        PrincipalReference::of(principal)
    }

    /// Resolve a reference back to a principal.
    ///
    /// A deleted account yields [`AuthError::PrincipalNotFound`]; callers
    /// downgrade that to anonymous rather than surfacing it.
    pub async fn deserialize(&self, reference: PrincipalReference) -> AuthResult<Principal> {
        self.store
            .find_by_id(reference.id())
            .await?
            .ok_or(AuthError::PrincipalNotFound(reference.id()))
    }
}
