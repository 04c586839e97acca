// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "HPCSTAGE_LOG";
pub const LOG_FORMAT_ENV: &str = "HPCSTAGE_LOG_FORMAT";
pub const LOG_SPAN_EVENTS_ENV: &str = "HPCSTAGE_LOG_SPAN_EVENTS";
pub const LOG_FILE_ENV: &str = "HPCSTAGE_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber. Logs go to stderr so stdout stays machine-readable.
pub fn init(verbose: bool) {
    let filter = build_filter(env::var(LOG_ENV).ok().as_deref(), verbose);
    let format = parse_format(env::var(LOG_FORMAT_ENV).ok().as_deref());
    let span_events = parse_span_events(env::var(LOG_SPAN_EVENTS_ENV).ok().as_deref());

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(
        format,
        span_events.clone(),
        std::io::stderr,
        true,
    )];
    let file = env::var(LOG_FILE_ENV).ok();
    if let Some((writer, guard)) = build_file_writer(file.as_deref()) {
        layers.push(fmt_layer(format, span_events, writer, false));
        let _ = FILE_GUARD.set(guard);
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .with(tracing_error::ErrorLayer::default())
        .init();
}

fn fmt_layer<W>(format: LogFormat, span_events: FmtSpan, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events)
        .with_ansi(ansi)
        .with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

fn build_filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
    match directives.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => EnvFilter::new(value),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("info"),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

/// Accepts a comma-separated list such as `new,close`, or `active` / `full`.
fn parse_span_events(value: Option<&str>) -> FmtSpan {
    let Some(value) = normalized(value) else {
        return FmtSpan::NONE;
    };
    value
        .split(',')
        .map(str::trim)
        .fold(FmtSpan::NONE, |acc, item| {
            acc | match item {
                "new" => FmtSpan::NEW,
                "enter" => FmtSpan::ENTER,
                "exit" => FmtSpan::EXIT,
                "close" => FmtSpan::CLOSE,
                "active" => FmtSpan::ACTIVE,
                "full" => FmtSpan::FULL,
                _ => FmtSpan::NONE,
            }
        })
}

fn build_file_writer(file_path: Option<&str>) -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = file_path.map(str::trim).filter(|value| !value.is_empty())?;
    let path = Path::new(file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
