//! Exact-match dispatch from (method, path) to route handlers.

use crate::pipeline::context::RequestContext;
use crate::pipeline::error::StageError;
use crate::pipeline::stage::RouteHandler;
use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use http::header::ALLOW;
use http::{HeaderValue, Method};
use indexmap::IndexMap;
use std::sync::Arc;

/// Route table used as the pipeline's final handler.
///
/// Unknown paths get a JSON 404 (or the configured fallback); known paths
/// with the wrong method get a 405 carrying `Allow`.
#[derive(Clone, Default)]
pub struct Routes {
    table: IndexMap<String, Vec<(Method, Arc<dyn RouteHandler>)>>,
    fallback: Option<Arc<dyn RouteHandler>>,
}

impl std::fmt::Debug for Routes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.table.keys()).finish()
    }
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: Method, path: impl Into<String>, handler: Arc<dyn RouteHandler>) -> Self {
        self.table
            .entry(path.into())
            .or_default()
            .push((method, handler));
        self
    }

    pub fn fallback(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl RouteHandler for Routes {
    async fn handle(&self, ctx: &mut RequestContext) -> Response {
        let Some(handlers) = self.table.get(ctx.path()) else {
            return match &self.fallback {
                Some(fallback) => fallback.handle(ctx).await,
                None => StageError::NotFound(ctx.path().to_string()).into_response(),
            };
        };

        let method = ctx.method().clone();
        let found = handlers
            .iter()
            .find(|(m, _)| *m == method || (method == Method::HEAD && *m == Method::GET))
            .map(|(_, handler)| handler.clone());

        match found {
            Some(handler) => handler.handle(ctx).await,
            None => {
                let allow = handlers
                    .iter()
                    .map(|(m, _)| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut response = StageError::MethodNotAllowed(method.to_string()).into_response();
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(ALLOW, value);
                }
                response
            }
        }
    }
}
