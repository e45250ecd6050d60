//! Usage: stderr tracing setup for the CLI (stdout carries only the token).

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const ENV_LOG: &str = "OAUTH2MS_LOG";

fn default_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Directive string taken from `OAUTH2MS_LOG`, then `RUST_LOG`.
fn env_directives() -> Option<String> {
    [ENV_LOG, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn build_filter(verbose: u8, directives: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(default_level(verbose).into());
    match directives {
        Some(directives) => builder.parse_lossy(directives),
        None => builder.parse_lossy(""),
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(verbose: u8) -> Option<WorkerGuard> {
    let filter = build_filter(verbose, env_directives().as_deref());
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .try_init();
    if installed.is_err() {
        return None;
    }

    // The subscriber is built without its own `tracing-log` feature; this is the only bridge.
    if let Err(err) = tracing_log::LogTracer::init() {
        tracing::warn!("log records from dependencies will be dropped: {err}");
    }
    Some(guard)
}
