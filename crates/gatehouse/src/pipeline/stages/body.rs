//! `application/x-www-form-urlencoded` body parsing.

use crate::config::BodyConfig;
use crate::pipeline::context::RequestContext;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::form::FormData;
use crate::pipeline::stage::{Flow, Stage};
use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};

const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Content type essence and charset parameter, lowercased.
fn media_type(headers: &HeaderMap) -> Option<(String, Option<String>)> {
    let raw = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let mut parts = raw.split(';');
    let essence = parts.next()?.trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    });
    Some((essence, charset))
}

/// Decodes urlencoded bodies into [`FormData`].
///
/// Other content types are left untouched for the route handler.
#[derive(Debug, Clone)]
pub struct FormBodyStage {
    limit: usize,
    parameter_limit: usize,
}

impl FormBodyStage {
    pub fn new(config: &BodyConfig) -> Self {
        Self {
            limit: config.limit,
            parameter_limit: config.parameter_limit,
        }
    }
}

#[async_trait]
impl Stage for FormBodyStage {
    fn name(&self) -> &'static str {
        "form_body"
    }

    async fn before(&self, ctx: &mut RequestContext) -> StageResult<Flow> {
        let Some((essence, charset)) = media_type(ctx.headers()) else {
            return Ok(Flow::Continue);
        };
        if essence != URLENCODED {
            return Ok(Flow::Continue);
        }
        if let Some(charset) = charset.filter(|c| c != "utf-8") {
            return Err(StageError::UnsupportedCharset(charset));
        }

        let declared = ctx
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.limit) {
            return Err(StageError::PayloadTooLarge(format!(
                "declared {} bytes, limit is {}",
                declared.unwrap_or_default(),
                self.limit
            )));
        }

        let Some(body) = ctx.take_body() else {
            return Ok(Flow::Continue);
        };
        let bytes = axum::body::to_bytes(body, self.limit)
            .await
            .map_err(|e| StageError::PayloadTooLarge(e.to_string()))?;

        let mut fields = Vec::new();
        for (key, value) in url::form_urlencoded::parse(&bytes) {
            if fields.len() == self.parameter_limit {
                return Err(StageError::PayloadTooLarge(format!(
                    "more than {} parameters",
                    self.parameter_limit
                )));
            }
            fields.push((key.into_owned(), value.into_owned()));
        }

        ctx.set_form(FormData::new(fields));
        Ok(Flow::Continue)
    }
}
