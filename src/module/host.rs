//! Addon host
//!
//! Wires the engine, both managers and the watched folders together: maps
//! change notifications to load/unload/reload calls and performs the
//! startup scan.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::module::engine::Engine;
use crate::module::manager::{AddonManager, ExtensionKind, ExtensionManager, ModuleManager};
use crate::module::registry::{ModuleDependencies, ModuleDiscovery};
use crate::module::traits::ModuleError;
use crate::module::watch::{WatchEvent, WatchEventKind, WatchFolder};

const WATCHER: &str = "watcher";
const STARTUP: &str = "startup";

/// Top-level addon host
pub struct AddonHost {
    engine: Arc<Engine>,
    extensions: Arc<ExtensionManager>,
    modules: Arc<ModuleManager>,
    extension_folder: WatchFolder,
    patch_folder: WatchFolder,
    module_folder: WatchFolder,
}

impl AddonHost {
    pub fn new(engine: Arc<Engine>) -> Self {
        let config = engine.config();
        let watchers = &config.watchers;
        Self {
            extension_folder: WatchFolder::new(&config.extensions_dir, watchers.extension_watchers),
            patch_folder: WatchFolder::new(&config.patch_modules_dir, watchers.patch_module_watchers),
            module_folder: WatchFolder::new(&config.modules_dir, watchers.module_watchers),
            extensions: Arc::new(ExtensionManager::new(Arc::clone(&engine))),
            modules: Arc::new(ModuleManager::new(Arc::clone(&engine))),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn extensions(&self) -> &Arc<ExtensionManager> {
        &self.extensions
    }

    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }

    /// Route one notification; `false` if no folder took it
    pub async fn dispatch(&self, event: &WatchEvent) -> bool {
        let requester = if event.initial { STARTUP } else { WATCHER };
        let path = event.path.as_path();

        if self.patch_folder.matches(event) {
            match event.kind {
                WatchEventKind::Created => {
                    let kind = if event.initial {
                        ExtensionKind::PatchModule
                    } else {
                        ExtensionKind::PatchModuleHotload
                    };
                    self.extensions.load_as(path, requester, kind).await;
                }
                WatchEventKind::Changed => {
                    self.extensions.reload_patch(path, requester).await;
                }
                WatchEventKind::Deleted => {
                    self.extensions.set_current_kind(ExtensionKind::PatchModule);
                    self.extensions.unload(path, requester).await;
                }
            }
            return true;
        }

        if self.extension_folder.matches(event) {
            match event.kind {
                WatchEventKind::Created | WatchEventKind::Changed => {
                    self.extensions
                        .load_as(path, requester, ExtensionKind::Extension)
                        .await;
                }
                WatchEventKind::Deleted => self.extensions.unload(path, requester).await,
            }
            return true;
        }

        if self.module_folder.matches(event) {
            match event.kind {
                WatchEventKind::Created => {
                    self.modules.load(path, requester).await;
                }
                WatchEventKind::Changed => {
                    self.modules.reload(path, requester).await;
                }
                WatchEventKind::Deleted => self.modules.unload(path, requester).await,
            }
            return true;
        }

        debug!("Ignoring {:?} for {:?}", event.kind, event.path);
        false
    }

    /// Process notifications one at a time, in arrival order
    pub fn spawn_dispatcher(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.dispatch(&event).await;
            }
            debug!("Watch event channel closed");
        })
    }

    /// Startup scan: patches, then extensions, then modules
    ///
    /// Within a folder, sibling references load first; a reference cycle
    /// falls back to file name order.
    pub async fn load_all(&self) -> Result<(), ModuleError> {
        info!("Loading all addons");
        let folders = [
            self.patch_folder.directory.clone(),
            self.extension_folder.directory.clone(),
            self.module_folder.directory.clone(),
        ];

        for directory in folders {
            for path in self.load_order(&directory)? {
                self.dispatch(&WatchEvent::initial(path)).await;
            }
        }
        Ok(())
    }

    fn load_order(&self, directory: &std::path::Path) -> Result<Vec<PathBuf>, ModuleError> {
        let discovered = ModuleDiscovery::new(directory).discover_modules()?;

        let names = match ModuleDependencies::resolve(&discovered) {
            Ok(resolution) => resolution.load_order,
            Err(e) => {
                warn!("{} in {:?}; loading in file name order", e, directory);
                return Ok(discovered.into_iter().map(|m| m.path).collect());
            }
        };

        let mut by_name: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for module in discovered {
            by_name.entry(module.name()).or_default().push(module.path);
        }
        Ok(names
            .iter()
            .flat_map(|name| by_name.remove(name).unwrap_or_default())
            .collect())
    }

    /// Exposed type name -> (file, bytes) across both managers
    pub async fn loaded(&self) -> HashMap<String, (PathBuf, Vec<u8>)> {
        let mut all = self.extensions.loaded().await;
        all.extend(self.modules.loaded().await);
        all
    }

    /// Shared type name -> file across both managers
    pub async fn shared(&self) -> HashMap<String, PathBuf> {
        let mut all = self.extensions.shared().await;
        all.extend(self.modules.shared().await);
        all
    }

    /// Cached bytes of the module most recently loaded as `name`
    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.engine.read(name)
    }

    /// Unload everything and dispose the engine caches
    pub async fn shutdown(&self) {
        self.modules.shutdown().await;
        self.extensions.shutdown().await;
        self.engine.dispose();
    }
}
