//! File logging
//!
//! stdout carries the NDJSON event stream that tooling parses line by line,
//! so no `tracing` output may ever reach it. Every record goes to a daily
//! rolling file instead.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter
pub const LOG_ENV_VAR: &str = "XDL_LOG";

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV_VAR: &str = "XDL_LOG_DIR";

const LOG_FILE_PREFIX: &str = "xdl.log";

/// Every workspace crate at info, dependencies at warn
const DEFAULT_FILTER: &str = "xdl=info,xdl_core=info,xdl_daemon=info,xdl_server=info,xdl_app=info,warn";

/// Install the file subscriber and return the directory it writes to.
///
/// ```bash
/// XDL_LOG=debug xdl ./my-app
/// XDL_LOG=xdl_server=trace,info XDL_LOG_DIR=/tmp/xdl xdl ./my-app
/// ```
pub fn init() -> Result<PathBuf> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("xdl {} logging to {}", env!("CARGO_PKG_VERSION"), log_dir.display());
    Ok(log_dir)
}

/// `$XDL_LOG_DIR`, else `<data_local_dir>/xdl/logs`
pub fn log_directory() -> PathBuf {
    resolve_log_directory(
        std::env::var_os(LOG_DIR_ENV_VAR).map(PathBuf::from),
        dirs::data_local_dir(),
    )
}

/// Today's log file; the appender adds a date suffix on disk
pub fn current_log_file() -> PathBuf {
    log_directory().join(LOG_FILE_PREFIX)
}

fn resolve_log_directory(override_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> PathBuf {
    match override_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => data_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xdl")
            .join("logs"),
    }
}
