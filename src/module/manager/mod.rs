//! Addon lifecycle managers
//!
//! [`ExtensionManager`] owns capability-restricted extensions and dependency
//! patches; [`ModuleManager`] owns full-capability modules. Both share the
//! pipeline in [`lifecycle`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::module::traits::{AddonFlavor, AddonHandle, ModuleState};

pub mod lifecycle;
pub mod extension;
pub mod module;

pub use lifecycle::{AddonKind, LifecycleCore, LoadedModuleRecord, UnloadPolicy};
pub use extension::{ExtensionKind, ExtensionManager};
pub use module::ModuleManager;

/// Operations common to both manager flavors
///
/// Every operation is serialized per file and reports failures through
/// logs and lifecycle events rather than errors.
#[async_trait]
pub trait AddonManager: Send + Sync {
    fn flavor(&self) -> AddonFlavor;

    /// Load or hot-replace `file`; `None` when refused or failed
    async fn load(&self, file: &Path, requester: &str) -> Option<AddonHandle>;

    async fn unload(&self, file: &Path, requester: &str);

    /// Unload then load under one file lock
    async fn reload(&self, file: &Path, requester: &str) -> Option<AddonHandle>;

    /// Unload everything, hotloadable or not
    async fn shutdown(&self);

    fn state(&self, file: &Path) -> ModuleState;

    async fn record(&self, file: &Path) -> Option<LoadedModuleRecord>;

    /// Exposed type name -> (file, rewritten bytes)
    async fn loaded(&self) -> HashMap<String, (PathBuf, Vec<u8>)>;

    /// Shared type name -> file
    async fn shared(&self) -> HashMap<String, PathBuf>;
}
