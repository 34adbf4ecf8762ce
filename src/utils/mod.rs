//! Utility modules shared by the engine, the managers and the binaries

pub mod error;
pub mod logging;
pub mod time;
pub mod timeout;

// Re-export commonly used items
pub use error::{log_error, with_default};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config, init_validator_logging};
pub use time::TimeMeasure;
pub use timeout::{with_custom_timeout, DEFAULT_VALIDATION_TIMEOUT};
