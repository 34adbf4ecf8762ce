//! Full-capability module manager

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::module::engine::Engine;
use crate::module::manager::lifecycle::{AddonKind, LifecycleCore, LoadedModuleRecord, UnloadPolicy};
use crate::module::manager::AddonManager;
use crate::module::traits::{AddonFlavor, AddonHandle, ModuleState};

/// Manager for full-capability modules
///
/// Modules are enabled right after `on_loaded`; there is no separate enable
/// step. Failing `on_unloaded` hooks are logged only.
pub struct ModuleManager {
    core: LifecycleCore,
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            core: LifecycleCore::new(AddonFlavor::Module, engine),
        }
    }

    pub fn core(&self) -> &LifecycleCore {
        &self.core
    }
}

#[async_trait]
impl AddonManager for ModuleManager {
    fn flavor(&self) -> AddonFlavor {
        AddonFlavor::Module
    }

    async fn load(&self, file: &Path, requester: &str) -> Option<AddonHandle> {
        let _guard = self.core.lock_file(file).await;
        self.core.load_locked(file, requester, AddonKind::Module).await
    }

    async fn unload(&self, file: &Path, requester: &str) {
        let _guard = self.core.lock_file(file).await;
        self.core
            .unload_locked(file, requester, UnloadPolicy::MODULE)
            .await
    }

    async fn reload(&self, file: &Path, requester: &str) -> Option<AddonHandle> {
        let _guard = self.core.lock_file(file).await;
        info!("Reloading module {:?}", file);
        self.core
            .reload_locked(file, requester, AddonKind::Module, UnloadPolicy::MODULE)
            .await
    }

    async fn shutdown(&self) {
        self.core.shutdown("shutdown", |_| UnloadPolicy::MODULE).await
    }

    fn state(&self, file: &Path) -> ModuleState {
        self.core.state(file)
    }

    async fn record(&self, file: &Path) -> Option<LoadedModuleRecord> {
        self.core.record(file).await
    }

    async fn loaded(&self) -> HashMap<String, (PathBuf, Vec<u8>)> {
        self.core.loaded().await
    }

    async fn shared(&self) -> HashMap<String, PathBuf> {
        self.core.shared().await
    }
}
