use crate::pipeline::context::RequestContext;
use crate::pipeline::stage::{FailureMode, Flow, RouteHandler, Stage};
use axum::response::{IntoResponse, Response};
use log::{debug, trace};
use std::sync::Arc;
use tracing::{Instrument, info_span, instrument, warn};

/// Runs stages in a fixed order around a route handler.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        debug!("Creating Pipeline with {} stages", stages.len());
        Self { stages }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|stage| stage.name())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Drive one request to a response.
    ///
    /// `before` hooks run in order until one responds or fails closed. The
    /// handler runs only if every stage continued. `after` hooks then run in
    /// reverse for every stage that was entered, including the one that
    /// stopped the request.
    #[instrument(
        name = "pipeline.request",
        skip_all,
        fields(
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
            status = tracing::field::Empty,
        )
    )]
    pub async fn run(&self, mut ctx: RequestContext, handler: &dyn RouteHandler) -> Response {
        let mut entered = 0;
        let mut early = None;

        for stage in &self.stages {
            entered += 1;
            let span = info_span!("pipeline.stage", name = %stage.name(), hook = "before");
            match stage.before(&mut ctx).instrument(span).await {
                Ok(Flow::Continue) => {
                    trace!("stage {} continued", stage.name());
                }
                Ok(Flow::Respond(response)) => {
                    debug!("stage {} answered the request", stage.name());
                    early = Some(response);
                    break;
                }
                Err(err) => match stage.failure_mode() {
                    FailureMode::FailOpen => {
                        warn!(stage = stage.name(), error = %err, "stage failed, continuing without it");
                    }
                    FailureMode::FailClosed => {
                        warn!(stage = stage.name(), error = %err, "stage rejected the request");
                        early = Some(err.into_response());
                        break;
                    }
                },
            }
        }

        let mut response = match early {
            Some(response) => response,
            None => {
                handler
                    .handle(&mut ctx)
                    .instrument(info_span!("pipeline.handler"))
                    .await
            }
        };

        for stage in self.stages[..entered].iter().rev() {
            let span = info_span!("pipeline.stage", name = %stage.name(), hook = "after");
            if let Err(err) = stage.after(&mut ctx, &mut response).instrument(span).await {
                match stage.failure_mode() {
                    FailureMode::FailOpen => {
                        warn!(stage = stage.name(), error = %err, "after hook failed, response kept");
                    }
                    FailureMode::FailClosed => {
                        warn!(stage = stage.name(), error = %err, "after hook failed, response replaced");
                        response = err.into_response();
                    }
                }
            }
        }

        tracing::Span::current().record("status", response.status().as_u16());
        response
    }
}
