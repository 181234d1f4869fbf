//! Structured logging setup shared by every binary: a console layer honoring
//! `CONSOLE_LOG_LEVEL` and a non-blocking rolling file layer honoring
//! `FILE_LOG_LEVEL`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for one binary. Returns the
/// file appender's `WorkerGuard`, which must be held for the process's
/// lifetime (dropping it stops flushing buffered log lines to disk).
pub fn init(console_log_level: &str, file_log_level: &str, log_dir: &str, binary_name: &str) -> WorkerGuard {
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{binary_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_filter(EnvFilter::new(console_log_level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new(file_log_level));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
