//! Services handed to addons before activation

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::module::api::events::EventBus;

/// Logger scoped to one addon
#[derive(Debug, Clone)]
pub struct AddonLogger {
    addon: Arc<str>,
}

impl AddonLogger {
    pub fn new(addon: impl Into<Arc<str>>) -> Self {
        Self {
            addon: addon.into(),
        }
    }

    pub fn addon(&self) -> &str {
        &self.addon
    }

    pub fn debug(&self, message: &str) {
        debug!(addon = %self.addon, "{}", message);
    }

    pub fn info(&self, message: &str) {
        info!(addon = %self.addon, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(addon = %self.addon, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(addon = %self.addon, "{}", message);
    }
}

/// Host singletons an addon may use
///
/// Extensions receive `restricted == true` and must not mutate host state.
#[derive(Clone)]
pub struct HostServices {
    pub logger: AddonLogger,
    pub events: Arc<EventBus>,
    pub restricted: bool,
}

impl HostServices {
    pub fn new(addon: &str, events: Arc<EventBus>, restricted: bool) -> Self {
        Self {
            logger: AddonLogger::new(addon),
            events,
            restricted,
        }
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("logger", &self.logger)
            .field("restricted", &self.restricted)
            .finish_non_exhaustive()
    }
}
