//! Addon engine
//!
//! Loads, validates, activates, hot-swaps and unloads addon module images
//! while the host keeps running.
//!
//! ## Architecture
//!
//! - **Sandboxed validation**: declared references are checked against the
//!   allow/deny policy in a separate process before any bytes are loaded
//! - **Fresh identities**: every load gets a unique identity and sibling
//!   references are re-linked, so a replaced instance never collides with
//!   its successor
//! - **Content cache**: byte-identical images are loaded once per process
//! - **Failure isolation**: a failed reload keeps the working module; a
//!   failed activation leaves an inert record for diagnostics
//! - **Per-file ordering**: operations on one file run in arrival order

pub mod api;
pub mod cache;
pub mod engine;
pub mod host;
pub mod image;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod rewriter;
pub mod sandbox;
pub mod traits;
pub mod validation;
pub mod watch;

pub use api::{EventBus, HostServices, LifecycleEvent, LifecycleEventKind};
pub use cache::ContentCache;
pub use engine::{Engine, EngineBuilder};
pub use host::AddonHost;
pub use loader::{AddonRegistry, NativeLoader, RegistryLoader};
pub use manager::{AddonManager, ExtensionKind, ExtensionManager, ModuleManager};
pub use registry::ReferenceResolver;
pub use rewriter::ModuleRewriter;
pub use sandbox::{InProcessValidator, ModuleValidator, SandboxValidator};
pub use traits::{Addon, AddonContext, AddonError, AddonFlavor, AddonHandle, ModuleError, ModuleState};
pub use watch::{WatchEvent, WatchEventKind, WatchFolder};
