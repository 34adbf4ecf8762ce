//! Extension manager
//!
//! Extensions are capability-restricted: their services are marked
//! `restricted` and they may not mutate host state directly. The same
//! manager also owns dependency patch modules, whose unload policy differs:
//! every patch hook gets `on_unloaded` and the record is dropped regardless
//! of the hotload marker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::module::engine::Engine;
use crate::module::manager::lifecycle::{AddonKind, LifecycleCore, LoadedModuleRecord, UnloadPolicy};
use crate::module::manager::AddonManager;
use crate::module::traits::{AddonFlavor, AddonHandle, ModuleState};

/// What the extension manager is currently loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExtensionKind {
    #[default]
    Extension,
    /// Dependency patch found by the startup scan
    PatchModule,
    /// Dependency patch (re)loaded by a change notification
    PatchModuleHotload,
}

impl From<ExtensionKind> for AddonKind {
    fn from(kind: ExtensionKind) -> Self {
        match kind {
            ExtensionKind::Extension => AddonKind::Extension,
            ExtensionKind::PatchModule => AddonKind::PatchModule,
            ExtensionKind::PatchModuleHotload => AddonKind::PatchModuleHotload,
        }
    }
}

fn unload_policy(kind: AddonKind) -> UnloadPolicy {
    if kind.is_patch() {
        UnloadPolicy::PATCH
    } else {
        UnloadPolicy::EXTENSION
    }
}

/// Manager for extensions and dependency patches
pub struct ExtensionManager {
    core: LifecycleCore,
    current_kind: Mutex<ExtensionKind>,
}

impl ExtensionManager {
    /// Create a new extension manager
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            core: LifecycleCore::new(AddonFlavor::Extension, engine),
            current_kind: Mutex::new(ExtensionKind::default()),
        }
    }

    pub fn core(&self) -> &LifecycleCore {
        &self.core
    }

    pub fn current_kind(&self) -> ExtensionKind {
        *self.current_kind.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_current_kind(&self, kind: ExtensionKind) {
        *self.current_kind.lock().unwrap_or_else(|p| p.into_inner()) = kind;
    }

    /// Load `file` as `kind`
    pub async fn load_as(
        &self,
        file: &Path,
        requester: &str,
        kind: ExtensionKind,
    ) -> Option<AddonHandle> {
        let _guard = self.core.lock_file(file).await;
        self.set_current_kind(kind);
        self.core.load_locked(file, requester, kind.into()).await
    }

    /// Replace a patch module with its current contents, as a hotload
    pub async fn reload_patch(&self, file: &Path, requester: &str) -> Option<AddonHandle> {
        let _guard = self.core.lock_file(file).await;
        info!("Reloading patch module {:?}", file);
        self.set_current_kind(ExtensionKind::PatchModuleHotload);
        self.core
            .reload_locked(
                file,
                requester,
                AddonKind::PatchModuleHotload,
                UnloadPolicy::PATCH,
            )
            .await
    }

    /// Policy follows what the record was loaded as
    async fn unload_locked(&self, file: &Path, requester: &str) {
        let policy = match self.core.record_kind(file).await {
            Some(kind) => unload_policy(kind),
            None => UnloadPolicy::EXTENSION,
        };
        self.core.unload_locked(file, requester, policy).await
    }
}

#[async_trait]
impl AddonManager for ExtensionManager {
    fn flavor(&self) -> AddonFlavor {
        AddonFlavor::Extension
    }

    async fn load(&self, file: &Path, requester: &str) -> Option<AddonHandle> {
        let _guard = self.core.lock_file(file).await;
        // Read under the lock; load_as sets it under the same lock
        let kind = self.current_kind();
        self.core.load_locked(file, requester, kind.into()).await
    }

    async fn unload(&self, file: &Path, requester: &str) {
        let _guard = self.core.lock_file(file).await;
        self.unload_locked(file, requester).await
    }

    async fn reload(&self, file: &Path, requester: &str) -> Option<AddonHandle> {
        let _guard = self.core.lock_file(file).await;
        info!("Reloading extension {:?}", file);
        let kind = match self.core.record_kind(file).await {
            Some(k) if k.is_patch() => AddonKind::PatchModuleHotload,
            Some(k) => k,
            None => self.current_kind().into(),
        };
        self.core
            .reload_locked(file, requester, kind, unload_policy(kind))
            .await
    }

    async fn shutdown(&self) {
        self.core.shutdown("shutdown", unload_policy).await
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
