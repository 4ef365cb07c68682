//! Turns the session's principal reference into an [`Authentication`].

use crate::auth::{AuthError, Authentication, PrincipalSerializer};
use crate::pipeline::context::RequestContext;
use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Flow, Stage};
use async_trait::async_trait;
use tracing::{info, warn};

/// Never rejects a request: anything short of a resolved principal is
/// anonymous.
///
/// A reference to a deleted principal is removed from the session. A store
/// failure keeps the reference so the user is recognised again once the store
/// recovers.
#[derive(Debug, Clone)]
pub struct AuthenticationStage {
    serializer: PrincipalSerializer,
}

impl AuthenticationStage {
    pub fn new(serializer: PrincipalSerializer) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn before(&self, ctx: &mut RequestContext) -> StageResult<Flow> {
        ctx.set_serializer(self.serializer.clone());

        let Some(reference) = ctx.session().and_then(|session| session.principal()) else {
            ctx.set_authentication(Authentication::Anonymous);
            return Ok(Flow::Continue);
        };

        let authentication = match self.serializer.deserialize(reference).await {
            Ok(principal) => Authentication::Authenticated(principal),
            Err(AuthError::PrincipalNotFound(id)) => {
                info!(principal = %id, "principal no longer exists, continuing anonymously");
                if let Some(session) = ctx.session_mut() {
                    session.clear_principal();
                }
                Authentication::Anonymous
            }
            Err(err) => {
                warn!(principal = %reference.id(), error = %err, "principal lookup failed, continuing anonymously");
                Authentication::Anonymous
            }
        };

        ctx.set_authentication(authentication);
        Ok(Flow::Continue)
    }
}
