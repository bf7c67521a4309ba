//! Tracing subscriber setup for the CLI binary.
//!
//! Verbosity is controlled by `RUST_LOG` (defaults to `info` when unset).
//! Logs are written to a daily-rolling file under the resolved home
//! directory rather than the terminal, so they don't interleave with the
//! chat transcript or a task's printed answer.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Keeps the non-blocking writer alive for the lifetime of the process.
static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialise the global tracing subscriber, logging to `<home>/logs/myclaw.log`.
///
/// Safe to call more than once per process (e.g. across test harnesses
/// that each build their own `Runtime`) — `try_init` silently no-ops if a
/// subscriber is already installed.
pub fn init(log_dir: PathBuf) {
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "myclaw.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .ok();
}
