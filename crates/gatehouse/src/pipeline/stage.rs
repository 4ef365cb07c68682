use crate::pipeline::context::RequestContext;
use crate::pipeline::error::StageResult;
use async_trait::async_trait;
use axum::response::Response;

/// What happens when a stage hook returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Log and carry on without the stage's feature
    FailOpen,
    /// Stop and answer with the error
    FailClosed,
}

/// Outcome of a stage's `before` hook.
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Answer now; later stages and the route handler are skipped
    Respond(Response),
}

/// One step of the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailClosed
    }

    /// Runs on the way in, in pipeline order
    async fn before(&self, _ctx: &mut RequestContext) -> StageResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Runs on the way out, in reverse order, for every stage whose `before` ran
    async fn after(&self, _ctx: &mut RequestContext, _response: &mut Response) -> StageResult<()> {
        Ok(())
    }
}

/// Application code invoked once every stage has continued.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> Response;
}
