//! Logging initialization for the addon host and the validator child
//!
//! Provides simple logging initialization that:
//! - Respects RUST_LOG environment variable
//! - Allows configuration via the engine config file
//! - Gives the sandboxed validator its own stderr-only filter
//!
//! # Usage
//!
//! ## Host
//! ```rust,no_run
//! use addon_host::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```
//!
//! ## Validator child
//! ```rust,no_run
//! use addon_host::utils::init_validator_logging;
//!
//! init_validator_logging(None);
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: RUST_LOG wins, then the configured filter, then `default`.
fn resolve_filter(filter: Option<&str>, default: &str) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or(default))
}

/// Initialize logging for the host process
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "info", "addon_host::module=debug").
///              If None, uses RUST_LOG environment variable or defaults to "info"
///
/// # Example
/// ```rust,no_run
/// use addon_host::utils::init_logging;
///
/// // Override with config filter (RUST_LOG still takes precedence)
/// init_logging(Some("debug"));
/// ```
pub fn init_logging(filter: Option<&str>) {
    let env_filter = resolve_filter(filter, "info");

    // try_init: a second initialization (tests, embedded hosts) is not an error
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter)
        .try_init();
}

/// Initialize logging for the sandboxed validator child
///
/// Stdout carries the verdict, so everything goes to stderr without colors.
/// Defaults to warnings only: the parent logs the outcome.
pub fn init_validator_logging(filter: Option<&str>) {
    let env_filter = resolve_filter(filter, "warn");

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false),
        )
        .with(env_filter)
        .try_init();
}

/// Initialize logging with JSON output (for production/monitoring)
///
/// # Arguments
/// * `filter` - Optional log filter from config. If None, uses RUST_LOG or defaults to "info"
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let env_filter = resolve_filter(filter, "info");

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter)
        .try_init();
}

/// Initialize logging from the engine's [`LoggingConfig`](crate::config::LoggingConfig)
///
/// RUST_LOG always takes precedence.
///
/// # Example
/// ```rust,no_run
/// use addon_host::config::EngineConfig;
/// use addon_host::utils::init_logging_from_config;
///
/// let config = EngineConfig::default();
/// init_logging_from_config(config.logging.as_ref());
/// ```
pub fn init_logging_from_config(config: Option<&crate::config::LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            // Fall back to regular logging if json-logging feature not enabled
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_harmless() {
        init_logging(Some("debug"));
        init_logging(None);
        init_validator_logging(None);
    }
}
