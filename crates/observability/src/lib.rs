//! Tracing and logging setup shared by every engine binary and test harness.

pub mod logging;

pub use logging::{LogConfig, LogConfigError};

/// Initialize process-wide logging from `STOCKFLOW_LOG_*` variables.
///
/// Falls back to the defaults when the variables are malformed. This is safe to
/// call multiple times; subsequent calls become no-ops.
pub fn init() {
    let config = LogConfig::from_env().unwrap_or_default();
    logging::init_with(&config);
}

/// Initialize process-wide logging with an explicit configuration.
pub fn init_with(config: &LogConfig) {
    logging::init_with(config);
}
