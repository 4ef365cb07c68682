//! One log line per request on the `gatehouse::access` target.

use crate::pipeline::context::RequestContext;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::{FailureMode, Stage};
use async_trait::async_trait;
use axum::body::HttpBody;
use axum::response::Response;
use http::header::{CONTENT_LENGTH, HeaderName, REFERER, USER_AGENT};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Tracing target every access line is emitted on.
pub const ACCESS_LOG_TARGET: &str = "gatehouse::access";

const CLF_TIME: &[BorrowedFormatItem<'static>] = format_description!(
    "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogFormat {
    /// Apache combined log format
    Combined,
    /// Short, human-oriented line for development
    Dev,
}

#[derive(Debug, Clone)]
pub struct AccessLogStage {
    format: AccessLogFormat,
}

impl AccessLogStage {
    pub fn new(format: AccessLogFormat) -> Self {
        Self { format }
    }

    /// Render the line for a finished request.
    pub fn line(&self, ctx: &RequestContext, response: &Response) -> StageResult<String> {
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| response.body().size_hint().exact().map(|n| n.to_string()))
            .unwrap_or_else(|| "-".into());

        match self.format {
            AccessLogFormat::Combined => {
                let header = |name: HeaderName| {
                    ctx.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-")
                        .to_string()
                };
                let remote = ctx
                    .remote_addr()
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_else(|| "-".into());
                let user = ctx
                    .principal()
                    .map(|p| p.username.clone())
                    .unwrap_or_else(|| "-".into());
                let timestamp = OffsetDateTime::now_utc()
                    .format(CLF_TIME)
                    .map_err(|e| StageError::Internal(e.to_string()))?;

                Ok(format!(
                    "{} - {} [{}] \"{} {} {:?}\" {} {} \"{}\" \"{}\"",
                    remote,
                    user,
                    timestamp,
                    ctx.method(),
                    ctx.uri(),
                    ctx.version(),
                    response.status().as_u16(),
                    length,
                    header(REFERER),
                    header(USER_AGENT),
                ))
            }
            AccessLogFormat::Dev => Ok(format!(
                "{} {} {} {:.3} ms - {}",
                ctx.method(),
                ctx.uri(),
                response.status().as_u16(),
                ctx.started_at().elapsed().as_secs_f64() * 1000.0,
                length,
            )),
        }
    }
}

#[async_trait]
impl Stage for AccessLogStage {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailOpen
    }

    async fn after(&self, ctx: &mut RequestContext, response: &mut Response) -> StageResult<()> {
        let line = self.line(ctx, response)?;
        tracing::info!(target: ACCESS_LOG_TARGET, request_id = %ctx.request_id(), "{}", line);
        Ok(())
    }
}
