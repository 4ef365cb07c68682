//! Subscriber setup: human-readable output on stdout, and in production the
//! access lines go to a daily-rotated file instead.

use anyhow::{Context, Result};
use gatehouse::{ACCESS_LOG_TARGET, GatehouseConfig};
use std::path::Path;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{Filtered, Targets};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{DefaultFields, Format, Full};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

const DEFAULT_FILTER: &str = "gatehouse=info,gatehouse_service=info";

pub type AccessLayer<S, W> =
    Filtered<fmt::Layer<S, DefaultFields, Format<Full, ()>, W>, Targets, S>;

/// Install the global subscriber.
///
/// The returned guard flushes the access log file; hold it until exit.
pub fn init(config: &GatehouseConfig) -> Result<Option<WorkerGuard>> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (access, guard) = if config.server.production {
        filter = filter.add_directive(format!("{ACCESS_LOG_TARGET}=off").parse()?);
        let (writer, guard) = tracing_appender::non_blocking(access_file(&config.log.dir)?);
        (Some(access_layer(writer)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .with(access)
        .init();
    Ok(guard)
}

/// `<dir>/access.YYYY-MM-DD.log`, rolled over at midnight UTC.
pub fn access_file(dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("access")
        .filename_suffix("log")
        .build(dir)
        .with_context(|| format!("opening access log in {}", dir.display()))
}

/// Writes only access lines, bare: the line already carries its own timestamp.
pub fn access_layer<S, W>(writer: W) -> AccessLayer<S, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .without_time()
        .with_filter(Targets::new().with_target(ACCESS_LOG_TARGET, Level::INFO))
}
