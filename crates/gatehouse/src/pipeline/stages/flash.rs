use crate::pipeline::context::RequestContext;
use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Flow, Stage};
use async_trait::async_trait;

/// Moves pending flash messages out of the session for this request.
#[derive(Debug, Clone, Default)]
pub struct FlashStage;

#[async_trait]
impl Stage for FlashStage {
    fn name(&self) -> &'static str {
        "flash"
    }

    async fn before(&self, ctx: &mut RequestContext) -> StageResult<Flow> {
        ctx.consume_flash();
        Ok(Flow::Continue)
    }
}
