//! Log subscriber setup for hosts and the `faultline` binary.
//!
//! [`init_production`] sends JSON records to a daily file under the
//! configured `logs_dir` and human-readable lines to stderr. [`init_cli`]
//! only writes to stderr.
//!
//! The file layer goes through a non-blocking writer whose worker thread may
//! never get to run after a panic, so the capture hook writes its one-line
//! marker straight to stderr instead of relying on these layers.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the file writer alive. Drop it last: dropping flushes buffered
/// fault records to disk.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Log fault records as JSON to `{logs_dir}/faultline.log.YYYY-MM-DD` and
/// to stderr. `RUST_LOG` filters both (default `info`).
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already set.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "faultline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("a log subscriber is already installed: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Stderr-only logging for the CLI. Keeps an already installed subscriber,
/// so hosts that set up their own logging are left alone.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
