//! Host-side API for addons
//!
//! Lifecycle events and the services injected into every addon.

pub mod events;
pub mod services;

pub use events::{EventBus, LifecycleEvent, LifecycleEventKind, SubscriptionId};
pub use services::{AddonLogger, HostServices};
