//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber filtered by
//! [`LoggingConfig::level`]. The `DOCVAULT_LOG` environment variable, when
//! set, takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "DOCVAULT_LOG";

/// Initialize the global subscriber.
///
/// Returns `false` if a subscriber was already installed (for example by a
/// test harness or the embedding application); that is not an error.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
