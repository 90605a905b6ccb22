//! Structured logging with environment variable configuration.
//!
//! Logs are written to stderr; stdout belongs to the engine's formatter
//! output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::RelayConfig;

fn filter_from_config(config: &RelayConfig) -> EnvFilter {
    EnvFilter::new(config.log_level.as_filter_str())
}

/// Initialise the logging subsystem based on configuration.
///
/// Log level precedence (highest to lowest):
///
/// 1. CLI `--log-level`
/// 2. `CUKE_RELAY_DEBUG`, then `CUKE_RELAY_LOG_LEVEL`
/// 3. Default configuration value
///
/// If a global subscriber is already set, this function silently ignores
/// the error. The first subscriber wins, which is what tests rely on.
pub fn init_logging(config: &RelayConfig) {
    let filter = filter_from_config(config);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
