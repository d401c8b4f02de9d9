//! Tracing/logging initialization for the exporter.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `debug` or
/// `sftp_exporter_checker=debug,info`.
pub const LOG_LEVEL_ENV: &str = "SFTP_EXPORTER_LOG_LEVEL";

/// Initialize tracing, reading the filter from `SFTP_EXPORTER_LOG_LEVEL`.
///
/// Defaults to `info` if the variable is unset or unparsable.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
