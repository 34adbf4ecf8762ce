//! Timeout utilities for fault tolerance
//!
//! The sandboxed validator is the only operation with a deadline. The default
//! below applies when the configuration does not set `validation.timeout_millis`.

use std::time::Duration;
use tokio::time::timeout;

/// Default deadline for one sandboxed validation
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Execute operation with custom timeout
pub async fn with_custom_timeout<F, T>(
    operation: F,
    duration: Duration,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: std::future::Future<Output = T>,
{
    timeout(duration, operation).await
}
