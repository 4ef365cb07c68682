//! gzip / deflate response compression.

use crate::config::CompressionConfig;
use crate::pipeline::context::RequestContext;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::{FailureMode, Stage};
use async_trait::async_trait;
use axum::body::{Body, HttpBody};
use axum::response::Response;
use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};
use http::header::{
    ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap,
    HeaderValue, VARY,
};
use http::{Method, StatusCode};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    fn header_value(self) -> HeaderValue {
        match self {
            Encoding::Gzip => HeaderValue::from_static("gzip"),
            Encoding::Deflate => HeaderValue::from_static("deflate"),
        }
    }

    fn encode(self, input: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(input)?;
                encoder.finish()
            }
            Encoding::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(input)?;
                encoder.finish()
            }
        }
    }
}

/// Pick an encoding from `Accept-Encoding`, preferring gzip on ties.
pub fn negotiate(headers: &HeaderMap) -> Option<Encoding> {
    let mut best: Option<(Encoding, f32)> = None;
    for value in headers.get_all(ACCEPT_ENCODING).iter() {
        let Ok(value) = value.to_str() else { continue };
        for item in value.split(',') {
            let mut params = item.split(';');
            let coding = params.next().unwrap_or_default().trim().to_ascii_lowercase();
            let quality = params
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if quality <= 0.0 {
                continue;
            }
            let encoding = match coding.as_str() {
                "gzip" | "x-gzip" | "*" => Encoding::Gzip,
                "deflate" => Encoding::Deflate,
                _ => continue,
            };
            let better = match best {
                None => true,
                Some((current, q)) => {
                    quality > q || (quality == q && encoding == Encoding::Gzip && current != Encoding::Gzip)
                }
            };
            if better {
                best = Some((encoding, quality));
            }
        }
    }
    best.map(|(encoding, _)| encoding)
}

fn is_compressible(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "application/x-www-form-urlencoded"
                | "image/svg+xml"
        )
}

fn known_length(response: &Response) -> Option<u64> {
    response.body().size_hint().exact().or_else(|| {
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    })
}

/// Compresses eligible responses on the way out.
///
/// Skipped for HEAD, 204 and 304 responses, bodies that are already encoded or
/// marked `no-transform`, content types that do not compress, bodies below
/// the threshold and bodies of unknown or excessive length.
#[derive(Debug, Clone)]
pub struct CompressionStage {
    config: CompressionConfig,
}

impl CompressionStage {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Stage for CompressionStage {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailOpen
    }

    async fn after(&self, ctx: &mut RequestContext, response: &mut Response) -> StageResult<()> {
        if !self.config.enabled || !is_compressible(response.headers()) {
            return Ok(());
        }
        response
            .headers_mut()
            .append(VARY, HeaderValue::from_static("accept-encoding"));

        if *ctx.method() == Method::HEAD
            || matches!(
                response.status(),
                StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
            )
            || response.headers().contains_key(CONTENT_ENCODING)
        {
            return Ok(());
        }
        let no_transform = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("no-transform"));
        if no_transform {
            return Ok(());
        }

        let Some(length) = known_length(response) else {
            return Ok(());
        };
        let length = usize::try_from(length).unwrap_or(usize::MAX);
        if length < self.config.threshold || length > self.config.max_size {
            return Ok(());
        }
        let Some(encoding) = negotiate(ctx.headers()) else {
            return Ok(());
        };

        let body = std::mem::replace(response.body_mut(), Body::empty());
        // Bounded by max_size above; an error here means the body stream
        // itself failed and there is nothing left to send.
        let raw = match axum::body::to_bytes(body, self.config.max_size).await {
            Ok(raw) => raw,
            Err(e) => {
                response.headers_mut().remove(CONTENT_LENGTH);
                return Err(StageError::Internal(format!("reading response body: {e}")));
            }
        };

        match encoding.encode(&raw) {
            Ok(compressed) => {
                let headers = response.headers_mut();
                headers.insert(CONTENT_ENCODING, encoding.header_value());
                headers.insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));
                headers.remove(http::header::ACCEPT_RANGES);
                *response.body_mut() = Body::from(compressed);
                Ok(())
            }
            Err(e) => {
                *response.body_mut() = Body::from(raw);
                Err(StageError::Internal(format!("{encoding:?} encoding failed: {e}")))
            }
        }
    }
}
