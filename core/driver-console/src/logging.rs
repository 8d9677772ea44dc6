//! File logging for the driver console.
//!
//! Stdout belongs to the operator, so logs go to a daily-rolling file under
//! `<data root>/logs/`. `BUSTRACK_DEBUG_LOG=1` forces debug level; otherwise
//! `RUST_LOG` applies, defaulting to `info`.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_LOG_ENV: &str = "BUSTRACK_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "driver.log";

/// Installs the global subscriber. Keep the guard alive for the whole run or
/// buffered lines are lost on exit. Returns `None` (logging disabled) when the
/// log directory cannot be created.
pub fn init(logs_dir: &Path) -> Option<WorkerGuard> {
    if let Err(err) = fs_err::create_dir_all(logs_dir) {
        eprintln!("warning: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    if installed.is_err() {
        return None;
    }
    Some(guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
