//! Shared lifecycle machinery
//!
//! Both manager flavors drive their records through [`LifecycleCore`]. Public
//! operations take the per-file lock first; the `*_locked` methods assume
//! the caller holds it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::module::api::events::{LifecycleEvent, LifecycleEventKind};
use crate::module::api::services::HostServices;
use crate::module::cache::CacheEntry;
use crate::module::engine::Engine;
use crate::module::image::{self, ContractKind, ImageHeader};
use crate::module::registry::header_of;
use crate::module::loader::ModuleHandle;
use crate::module::rewriter::RewrittenModule;
use crate::module::traits::{
    AddonContext, AddonError, AddonFlavor, AddonHandle, ModuleError, ModuleState,
};
use crate::utils::TimeMeasure;

/// What a record was loaded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonKind {
    Extension,
    /// Dependency patch loaded at startup
    PatchModule,
    /// Dependency patch loaded by a change notification
    PatchModuleHotload,
    Module,
}

impl AddonKind {
    /// Contract whose types get instantiated
    pub fn contract(self) -> ContractKind {
        match self {
            AddonKind::Extension => ContractKind::Extension,
            AddonKind::PatchModule | AddonKind::PatchModuleHotload => ContractKind::PatchHooks,
            AddonKind::Module => ContractKind::Module,
        }
    }

    pub fn is_patch(self) -> bool {
        matches!(self, AddonKind::PatchModule | AddonKind::PatchModuleHotload)
    }

    /// Whether activation runs `on_loaded`
    fn runs_on_loaded(self) -> bool {
        self != AddonKind::PatchModule
    }
}

/// How an unload treats the hotload marker and hook failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadPolicy {
    /// Refuse records whose types are not hotloadable
    pub respect_hotload: bool,
    /// Publish `*UnloadFailed` when `on_unloaded` fails
    pub publish_hook_failures: bool,
}

impl UnloadPolicy {
    pub const EXTENSION: UnloadPolicy = UnloadPolicy {
        respect_hotload: true,
        publish_hook_failures: true,
    };

    pub const PATCH: UnloadPolicy = UnloadPolicy {
        respect_hotload: false,
        publish_hook_failures: true,
    };

    pub const MODULE: UnloadPolicy = UnloadPolicy {
        respect_hotload: true,
        publish_hook_failures: false,
    };

    /// Used at shutdown
    pub fn forced(self) -> UnloadPolicy {
        UnloadPolicy {
            respect_hotload: false,
            ..self
        }
    }
}

/// One tracked file
#[derive(Debug, Clone)]
pub struct LoadedModuleRecord {
    pub file: PathBuf,
    /// Identity name before rewriting
    pub logical_name: String,
    /// Identity assigned by this load
    pub identity: String,
    pub kind: AddonKind,
    /// Rewritten bytes as handed to the loader
    pub raw: Vec<u8>,
    /// Contract-implementing types
    pub exposed_types: Vec<String>,
    /// All public types
    pub shared_types: Vec<String>,
    /// Activated addons; empty while the record is inert
    pub addons: Vec<AddonHandle>,
    pub can_hotload: bool,
    /// References no search directory could satisfy at load time
    pub unresolved_references: Vec<String>,
    pub module: ModuleHandle,
}

impl LoadedModuleRecord {
    /// Present but not activated
    pub fn is_inert(&self) -> bool {
        self.addons.is_empty()
    }

    fn context(&self, requester: &str) -> AddonContext {
        AddonContext {
            file: self.file.clone(),
            requester: requester.to_string(),
            identity: self.identity.clone(),
        }
    }
}

/// Per-file exclusion
///
/// tokio's mutex queues waiters fairly, so operations on one file run in
/// the order they asked for the lock.
#[derive(Default)]
pub struct FileLocks {
    locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub async fn acquire(&self, file: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Only the map holds idle locks; a held or awaited lock has a clone
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(file.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

struct Prepared {
    rewritten: RewrittenModule,
    entry: Arc<CacheEntry>,
    unresolved: Vec<String>,
}

/// Record set, state table and pipeline shared by both flavors
pub struct LifecycleCore {
    flavor: AddonFlavor,
    engine: Arc<Engine>,
    records: Mutex<HashMap<PathBuf, LoadedModuleRecord>>,
    states: StdMutex<HashMap<PathBuf, ModuleState>>,
    locks: FileLocks,
}

impl LifecycleCore {
    pub fn new(flavor: AddonFlavor, engine: Arc<Engine>) -> Self {
        Self {
            flavor,
            engine,
            records: Mutex::new(HashMap::new()),
            states: StdMutex::new(HashMap::new()),
            locks: FileLocks::default(),
        }
    }

    pub fn flavor(&self) -> AddonFlavor {
        self.flavor
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn lock_file(&self, file: &Path) -> OwnedMutexGuard<()> {
        self.locks.acquire(file).await
    }

    pub fn state(&self, file: &Path) -> ModuleState {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(file)
            .cloned()
            .unwrap_or(ModuleState::Unloaded)
    }

    fn set_state(&self, file: &Path, state: ModuleState) {
        debug!("{} {:?} -> {:?}", self.flavor, file, state);
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(file.to_path_buf(), state);
    }

    fn publish(&self, event: LifecycleEvent) {
        self.engine.events().publish(event);
    }

    pub async fn record(&self, file: &Path) -> Option<LoadedModuleRecord> {
        self.records.lock().await.get(file).cloned()
    }

    pub async fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = self.records.lock().await.keys().cloned().collect();
        files.sort();
        files
    }

    /// Exposed type name -> (file, rewritten bytes), activated records only
    pub async fn loaded(&self) -> HashMap<String, (PathBuf, Vec<u8>)> {
        let records = self.records.lock().await;
        let mut out = HashMap::new();
        for record in records.values().filter(|r| !r.is_inert()) {
            for t in &record.exposed_types {
                out.insert(t.clone(), (record.file.clone(), record.raw.clone()));
            }
        }
        out
    }

    /// Shared type name -> file, activated records only
    pub async fn shared(&self) -> HashMap<String, PathBuf> {
        let records = self.records.lock().await;
        let mut out = HashMap::new();
        for record in records.values().filter(|r| !r.is_inert()) {
            for t in &record.shared_types {
                out.insert(t.clone(), record.file.clone());
            }
        }
        out
    }

    /// Validate, rewrite and natively load `file`
    async fn prepare(&self, file: &Path) -> Result<Prepared, ModuleError> {
        if !image::is_module_file(file) {
            return Err(ModuleError::UnsupportedFormat(file.display().to_string()));
        }
        if tokio::fs::metadata(file).await.is_err() {
            return Err(ModuleError::ModuleNotFound(file.display().to_string()));
        }

        // Everything after this point works on these bytes, never the file
        let raw = tokio::fs::read(file).await?;

        self.set_state(file, ModuleState::Validating);
        let verdict = {
            let _measure = TimeMeasure::new(format!("validate {}", file.display()));
            self.engine
                .validator()
                .inspect_bytes(file, &raw, self.engine.policy())
                .await
        };
        if !verdict.accepted {
            return Err(ModuleError::ValidationRejected {
                path: file.display().to_string(),
                reason: verdict.reason.unwrap_or_else(|| "rejected".to_string()),
            });
        }

        let header = header_of(&raw)?;
        let linkage = self
            .engine
            .resolver()
            .link(&header.identity.name, &header.references);

        self.set_state(file, ModuleState::Rewriting);
        let rewritten = {
            let _measure = TimeMeasure::new(format!("rewrite {}", file.display()));
            self.engine.rewriter().rewrite(&raw, &linkage.renames)?
        };

        self.set_state(file, ModuleState::NativeLoading);
        let entry = self
            .engine
            .cache()
            .get_or_load(&rewritten.logical_name, &rewritten.bytes)?;

        Ok(Prepared {
            rewritten,
            entry,
            unresolved: linkage.unresolved,
        })
    }

    /// Build the (not yet activated) record
    fn instantiate(
        &self,
        file: &Path,
        kind: AddonKind,
        prepared: Prepared,
    ) -> Result<LoadedModuleRecord, ModuleError> {
        let handle = &prepared.entry.handle;
        let image = handle.image();
        let contract = kind.contract();

        let types: Vec<_> = image.exposed_types(contract).collect();
        if types.is_empty() {
            return Err(ModuleError::LoadFailure(format!(
                "{} exposes no {:?} types",
                file.display(),
                contract
            )));
        }

        let mut addons = Vec::with_capacity(types.len());
        for t in &types {
            let addon = handle.instantiate(&t.name).ok_or_else(|| {
                ModuleError::LoadFailure(format!("No addon type registered as {}", t.name))
            })?;
            addons.push(AddonHandle::new(t.name.as_str(), addon));
        }

        self.engine.resolver().register(
            &prepared.rewritten.logical_name,
            file,
            ImageHeader {
                identity: prepared.rewritten.image.identity.clone(),
                references: prepared.rewritten.image.references.clone(),
            },
        );

        Ok(LoadedModuleRecord {
            file: file.to_path_buf(),
            logical_name: prepared.rewritten.logical_name,
            identity: prepared.rewritten.identity,
            kind,
            raw: prepared.entry.raw.clone(),
            exposed_types: types.iter().map(|t| t.name.clone()).collect(),
            shared_types: image.shared_types(),
            can_hotload: types.iter().all(|t| t.hotloadable),
            unresolved_references: prepared.unresolved,
            addons,
            module: Arc::clone(handle),
        })
    }

    /// Hydrate, then run the activation hooks on every addon
    fn activate(&self, record: &LoadedModuleRecord, requester: &str) -> Result<(), AddonError> {
        let context = record.context(requester);
        let restricted = self.flavor == AddonFlavor::Extension;

        for addon in &record.addons {
            let services = HostServices::new(
                addon.type_name(),
                Arc::clone(self.engine.events()),
                restricted,
            );
            addon.invoke("hydrate", |a| {
                a.hydrate(&services);
                Ok(())
            })?;
            addon.invoke("awake", |a| a.awake(&context))?;
            if record.kind.runs_on_loaded() {
                addon.invoke("on_loaded", |a| a.on_loaded(&context))?;
            }
            if self.flavor == AddonFlavor::Module {
                addon.invoke("on_enable", |a| a.on_enable(&context))?;
            }
        }
        Ok(())
    }

    /// Best-effort `on_unloaded` on a replaced record
    ///
    /// Hook failures are published for extensions and patches only.
    fn retire(&self, old: &LoadedModuleRecord, requester: &str) {
        let context = old.context(requester);
        for addon in &old.addons {
            match addon.invoke("on_unloaded", |a| a.on_unloaded(&context)) {
                Ok(()) => self.publish(
                    LifecycleEvent::new(LifecycleEventKind::unloaded(self.flavor), &old.file)
                        .with_addon(Some(addon.clone()), old.shared_types.clone()),
                ),
                Err(e) => {
                    warn!(
                        "Failed to unload previous {} {} ({}): {}",
                        self.flavor, old.logical_name, old.identity, e
                    );
                    if self.flavor != AddonFlavor::Extension {
                        continue;
                    }
                    self.publish(
                        LifecycleEvent::new(
                            LifecycleEventKind::unload_failed(self.flavor),
                            &old.file,
                        )
                        .with_addon(Some(addon.clone()), old.shared_types.clone()),
                    );
                }
            }
        }
    }

    /// Load or replace `file`; `None` on refusal or failure
    pub async fn load_locked(
        &self,
        file: &Path,
        requester: &str,
        kind: AddonKind,
    ) -> Option<AddonHandle> {
        info!("Loading {} {:?} (requested by {})", self.flavor, file, requester);

        let previous_live = {
            let records = self.records.lock().await;
            match records.get(file) {
                // Patches are replaced regardless of the marker
                Some(r) if !r.is_inert() && !r.can_hotload && !r.kind.is_patch() => {
                    warn!(
                        "{}",
                        ModuleError::HotloadRefused(format!(
                            "{} {} is not hotloadable; keeping {}",
                            self.flavor, r.logical_name, r.identity
                        ))
                    );
                    return None;
                }
                Some(r) => !r.is_inert(),
                None => false,
            }
        };

        let prepared = match self.prepare(file).await {
            Ok(p) => p,
            Err(e) => {
                self.report_failure(file, &e, previous_live);
                return None;
            }
        };

        let mut record = match self.instantiate(file, kind, prepared) {
            Ok(r) => r,
            Err(e) => {
                self.report_failure(file, &e, previous_live);
                return None;
            }
        };

        // New instance is ready; only now is the previous one retired
        let old = self.records.lock().await.remove(file);
        if let Some(ref old) = old {
            if !old.is_inert() {
                self.retire(old, requester);
            }
        }

        self.set_state(file, ModuleState::Activating);
        if let Err(e) = self.activate(&record, requester) {
            let failure = ModuleError::ActivationFailure(format!(
                "{} {}: {}",
                self.flavor, record.logical_name, e
            ));
            error!("{}", failure);
            self.publish(
                LifecycleEvent::new(LifecycleEventKind::load_failed(self.flavor), file)
                    .with_addon(None, record.shared_types.clone()),
            );
            record.addons.clear();
            self.records.lock().await.insert(file.to_path_buf(), record);
            self.set_state(file, ModuleState::Failed(failure.to_string()));
            return None;
        }

        for addon in &record.addons {
            self.publish(
                LifecycleEvent::new(LifecycleEventKind::loaded(self.flavor), file)
                    .with_addon(Some(addon.clone()), record.shared_types.clone()),
            );
        }
        let first = record.addons.first().cloned();
        info!(
            "Loaded {} {} as {} ({} addon(s))",
            self.flavor,
            record.logical_name,
            record.identity,
            record.addons.len()
        );
        self.records.lock().await.insert(file.to_path_buf(), record);
        self.set_state(file, ModuleState::Loaded);
        first
    }

    /// Replace `file` with its current contents
    ///
    /// The running record stays in place until the new image has been
    /// validated, rewritten and instantiated. When `policy` honors the
    /// hotload marker a non-hotloadable record is refused the way an
    /// unload would be.
    pub async fn reload_locked(
        &self,
        file: &Path,
        requester: &str,
        kind: AddonKind,
        policy: UnloadPolicy,
    ) -> Option<AddonHandle> {
        let refuse = self
            .records
            .lock()
            .await
            .get(file)
            .map_or(false, |r| policy.respect_hotload && !r.is_inert() && !r.can_hotload);
        if refuse {
            self.unload_locked(file, requester, policy).await;
            return None;
        }
        self.load_locked(file, requester, kind).await
    }

    fn report_failure(&self, file: &Path, e: &ModuleError, previous_live: bool) {
        match e {
            ModuleError::ModuleNotFound(_) | ModuleError::UnsupportedFormat(_) => {
                warn!("Cannot load {} {:?}: {}", self.flavor, file, e)
            }
            ModuleError::ValidationRejected { .. } => warn!("{}", e),
            _ => error!("Failed to load {} {:?}: {}", self.flavor, file, e),
        }
        if previous_live {
            info!("Keeping previously loaded {} {:?}", self.flavor, file);
            self.set_state(file, ModuleState::Loaded);
        } else {
            self.set_state(file, ModuleState::Failed(e.to_string()));
        }
    }

    /// Unload `file` under `policy`
    pub async fn unload_locked(&self, file: &Path, requester: &str, policy: UnloadPolicy) {
        let record = {
            let mut records = self.records.lock().await;
            let Some(existing) = records.get(file) else {
                info!(
                    "{} {:?} is not loaded, nothing to unload (requested by {})",
                    self.flavor, file, requester
                );
                return;
            };
            if policy.respect_hotload && !existing.is_inert() && !existing.can_hotload {
                warn!(
                    "{}",
                    ModuleError::HotloadRefused(format!(
                        "{} {} is not hotloadable; unload refused",
                        self.flavor, existing.logical_name
                    ))
                );
                let event =
                    LifecycleEvent::new(LifecycleEventKind::unload_failed(self.flavor), file)
                        .with_addon(existing.addons.first().cloned(), existing.shared_types.clone());
                drop(records);
                self.publish(event);
                return;
            }
            match records.remove(file) {
                Some(r) => r,
                None => return,
            }
        };

        info!(
            "Unloading {} {} ({}) (requested by {})",
            self.flavor, record.logical_name, record.identity, requester
        );
        self.set_state(file, ModuleState::Unloading);

        let context = record.context(requester);
        for addon in &record.addons {
            self.publish(
                LifecycleEvent::new(LifecycleEventKind::unloaded(self.flavor), file)
                    .with_addon(Some(addon.clone()), record.shared_types.clone()),
            );
            if let Err(e) = addon.invoke("on_unloaded", |a| a.on_unloaded(&context)) {
                warn!(
                    "{} {} failed to unload cleanly: {}",
                    self.flavor,
                    addon.type_name(),
                    e
                );
                if policy.publish_hook_failures {
                    self.publish(
                        LifecycleEvent::new(LifecycleEventKind::unload_failed(self.flavor), file)
                            .with_addon(Some(addon.clone()), record.shared_types.clone()),
                    );
                }
            }
        }

        // Only forget the name if no later load re-registered it
        let resolver = self.engine.resolver();
        if resolver
            .cached(&record.logical_name)
            .map_or(false, |d| d.identity.name == record.identity)
        {
            resolver.forget(&record.logical_name);
        }
        self.set_state(file, ModuleState::Removed);
    }

    /// Unload every record, ignoring the hotload marker
    pub async fn shutdown(&self, requester: &str, policy_for: impl Fn(AddonKind) -> UnloadPolicy) {
        let files = self.tracked_files().await;
        info!("Shutting down {} manager ({} records)", self.flavor, files.len());
        for file in files {
            let _guard = self.lock_file(&file).await;
            let kind = match self.records.lock().await.get(&file) {
                Some(r) => r.kind,
                None => continue,
            };
            self.unload_locked(&file, requester, policy_for(kind).forced())
                .await;
        }
        info!("{} manager shut down", self.flavor);
    }

    pub async fn record_kind(&self, file: &Path) -> Option<AddonKind> {
        self.records.lock().await.get(file).map(|r| r.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_file_locks_are_dropped() {
        let locks = FileLocks::default();
        let a = locks.acquire(Path::new("a.amod")).await;
        drop(a);
        let _b = locks.acquire(Path::new("b.amod")).await;
        assert_eq!(locks.len(), 1);

        let _c = locks.acquire(Path::new("c.amod")).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_same_file_shares_one_lock() {
        let locks = Arc::new(FileLocks::default());
        let held = locks.acquire(Path::new("a.amod")).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire(Path::new("a.amod")).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }

    #[test]
    fn test_only_startup_patches_skip_on_loaded() {
        assert!(!AddonKind::PatchModule.runs_on_loaded());
        assert!(AddonKind::PatchModuleHotload.runs_on_loaded());
        assert!(AddonKind::Module.runs_on_loaded());
    }
}
