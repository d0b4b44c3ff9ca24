//! Logging initialization.
//!
//! Console output filtered by `RUST_LOG` (default `info`), plus a daily
//! rotated file next to the database when a log directory is given.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console-only logger (tests, tooling).
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Console + daily rotated file under `log_dir`. The returned guard must be
/// held for the lifetime of the process or buffered lines are lost.
pub fn init_logger_with_file(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let appender = tracing_appender::rolling::daily(log_dir, "zrp-server.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let init = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init();

    if init.is_err() {
        // Already initialized (e.g. by a test harness); keep console only.
        return None;
    }
    Some(guard)
}
