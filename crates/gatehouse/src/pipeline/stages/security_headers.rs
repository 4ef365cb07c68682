//! Security response headers: CSP, framing, sniffing and XSS filter.

use crate::config::SecurityConfig;
use crate::pipeline::context::RequestContext;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::Stage;
use async_trait::async_trait;
use axum::response::Response;
use http::header::{
    CONTENT_SECURITY_POLICY, HeaderMap, HeaderName, HeaderValue, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};

/// Sets each header unless the handler already chose a value.
#[derive(Debug, Clone)]
pub struct SecurityHeadersStage {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeadersStage {
    pub fn new(config: &SecurityConfig) -> StageResult<Self> {
        let mut headers = Vec::with_capacity(4);

        if !config.content_security_policy.is_empty() {
            let policy = content_security_policy(config);
            let value = HeaderValue::from_str(&policy)
                .map_err(|e| StageError::Internal(format!("invalid CSP: {e}")))?;
            headers.push((CONTENT_SECURITY_POLICY, value));
        }
        if !config.frame_options.is_empty() {
            let value = HeaderValue::from_str(&config.frame_options)
                .map_err(|e| StageError::Internal(format!("invalid X-Frame-Options: {e}")))?;
            headers.push((X_FRAME_OPTIONS, value));
        }
        headers.push((X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")));
        headers.push((X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")));

        Ok(Self { headers })
    }

    /// Fill in every header `target` does not already carry.
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            }
        }
    }
}

/// `name src src; name src` in configured order. Directives without sources
/// are emitted bare.
pub fn content_security_policy(config: &SecurityConfig) -> String {
    config
        .content_security_policy
        .iter()
        .map(|(name, sources)| {
            if sources.is_empty() {
                name.clone()
            } else {
                format!("{} {}", name, sources.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl Stage for SecurityHeadersStage {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    async fn after(&self, _ctx: &mut RequestContext, response: &mut Response) -> StageResult<()> {
        self.apply(response.headers_mut());
        Ok(())
    }
}
