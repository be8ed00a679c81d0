use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `mockprep=debug`.
pub const LOG_ENV: &str = "MOCKPREP_LOG";
pub const DEFAULT_FILTER: &str = "mockprep=info";
pub const LOG_FILE: &str = "mockprep.log";

pub fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Sends tracing output to `<dir>/mockprep.log`. The terminal belongs to the
/// TUI, so nothing is written to stdout. Keep the guard alive until exit or
/// buffered lines are lost.
pub fn init(dir: &Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let file_appender = tracing_appender::rolling::never(dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(filter())
        .try_init();

    Ok(guard)
}
