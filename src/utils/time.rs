//! Timing helpers for the load pipeline

use std::time::{Duration, Instant};
use tracing::debug;

/// Logs how long a scope took when dropped
///
/// ```rust
/// use addon_host::utils::TimeMeasure;
///
/// {
///     let _measure = TimeMeasure::new("rewrite");
///     // ... work ...
/// } // "[profiler] rewrite took Nms" at debug level
/// ```
pub struct TimeMeasure {
    name: String,
    started: Instant,
}

impl TimeMeasure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for TimeMeasure {
    fn drop(&mut self) {
        debug!(
            "[profiler] {} took {}ms",
            self.name,
            self.started.elapsed().as_millis()
        );
    }
}
