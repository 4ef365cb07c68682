//! Serves files from the configured asset directories.

use crate::pipeline::context::RequestContext;
use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{FailureMode, Flow, Stage};
use async_trait::async_trait;
use axum::body::Body;
use http::{Method, Request, StatusCode};
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::warn;

/// Looks the request path up in each directory in turn.
///
/// Only GET and HEAD are considered. A miss in every directory passes the
/// request on; a hit answers it directly.
#[derive(Debug, Clone)]
pub struct StaticAssetsStage {
    dirs: Vec<(PathBuf, ServeDir)>,
}

impl StaticAssetsStage {
    pub fn new(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        let dirs = dirs
            .into_iter()
            .map(|dir| {
                let service = ServeDir::new(&dir).append_index_html_on_directories(false);
                (dir, service)
            })
            .collect();
        Self { dirs }
    }
}

#[async_trait]
impl Stage for StaticAssetsStage {
    fn name(&self) -> &'static str {
        "static_assets"
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailOpen
    }

    async fn before(&self, ctx: &mut RequestContext) -> StageResult<Flow> {
        if !matches!(*ctx.method(), Method::GET | Method::HEAD) || self.dirs.is_empty() {
            return Ok(Flow::Continue);
        }

        for (dir, service) in &self.dirs {
            let mut request = Request::new(Body::empty());
            *request.method_mut() = ctx.method().clone();
            *request.uri_mut() = ctx.uri().clone();
            *request.headers_mut() = ctx.headers().clone();

            let response = match service.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };

            match response.status() {
                StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => continue,
                status if status.is_server_error() => {
                    warn!(dir = %dir.display(), %status, "asset lookup failed");
                    continue;
                }
                _ => return Ok(Flow::Respond(response.map(Body::new))),
            }
        }

        Ok(Flow::Continue)
    }
}
