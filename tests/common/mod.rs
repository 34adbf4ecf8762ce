//! Test utilities for addon host testing
//!
//! Provides an isolated directory layout, a recording addon whose hooks can
//! be made to fail or panic, and an engine wired with a counting loader.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use addon_host::module::api::HostServices;
use addon_host::module::image::{ContractKind, ModuleImage};
use addon_host::module::loader::{AddonRegistry, ModuleHandle, NativeLoader, RegistryLoader};
use addon_host::module::sandbox::{InProcessValidator, ModuleValidator};
use addon_host::{Addon, AddonContext, AddonError, Engine, EngineConfig, ModuleError};

/// Shared log of `<type>:<hook>:<identity>` lines
pub type HookLog = Arc<Mutex<Vec<String>>>;

/// How a [`RecordingAddon`] misbehaves
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    pub fail_on: Option<&'static str>,
    pub panic_on: Option<&'static str>,
}

impl Behavior {
    pub fn failing(hook: &'static str) -> Self {
        Self {
            fail_on: Some(hook),
            panic_on: None,
        }
    }

    pub fn panicking(hook: &'static str) -> Self {
        Self {
            fail_on: None,
            panic_on: Some(hook),
        }
    }
}

pub struct RecordingAddon {
    type_name: String,
    log: HookLog,
    behavior: Behavior,
}

impl RecordingAddon {
    fn hook(&self, hook: &'static str, context: &AddonContext) -> Result<(), AddonError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", self.type_name, hook, context.identity));
        if self.behavior.panic_on == Some(hook) {
            panic!("{} blew up", hook);
        }
        if self.behavior.fail_on == Some(hook) {
            return Err(AddonError::Failed(format!("{} refused", hook)));
        }
        Ok(())
    }
}

impl Addon for RecordingAddon {
    fn awake(&mut self, context: &AddonContext) -> Result<(), AddonError> {
        self.hook("awake", context)
    }

    fn on_loaded(&mut self, context: &AddonContext) -> Result<(), AddonError> {
        self.hook("on_loaded", context)
    }

    fn on_unloaded(&mut self, context: &AddonContext) -> Result<(), AddonError> {
        self.hook("on_unloaded", context)
    }

    fn on_enable(&mut self, context: &AddonContext) -> Result<(), AddonError> {
        self.hook("on_enable", context)
    }

    fn hydrate(&mut self, services: &HostServices) {
        self.log.lock().unwrap().push(format!(
            "{}:hydrate:restricted={}",
            self.type_name, services.restricted
        ));
    }
}

/// Loader that counts how often native loading was reached
pub struct CountingLoader {
    inner: RegistryLoader,
    loads: Arc<AtomicUsize>,
}

impl NativeLoader for CountingLoader {
    fn load(&self, bytes: &[u8]) -> Result<ModuleHandle, ModuleError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(bytes)
    }
}

/// Test fixture with isolated addon folders
pub struct AddonTestFixture {
    pub temp_dir: TempDir,
    pub config: EngineConfig,
    pub registry: AddonRegistry,
    pub log: HookLog,
    pub loads: Arc<AtomicUsize>,
}

impl AddonTestFixture {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let config = EngineConfig::with_root(temp_dir.path());

        std::fs::create_dir_all(&config.extensions_dir)?;
        std::fs::create_dir_all(&config.patch_modules_dir)?;
        std::fs::create_dir_all(&config.modules_dir)?;

        Ok(Self {
            temp_dir,
            config,
            registry: AddonRegistry::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            loads: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Register (or replace) a recording addon type
    pub fn register(&self, type_name: &str, behavior: Behavior) {
        let log = Arc::clone(&self.log);
        let name = type_name.to_string();
        self.registry.register(type_name, move || {
            Box::new(RecordingAddon {
                type_name: name.clone(),
                log: Arc::clone(&log),
                behavior,
            }) as Box<dyn Addon>
        });
    }

    /// Engine with in-process validation and a counting loader
    pub fn engine(&self) -> Arc<Engine> {
        self.engine_with_validator(Arc::new(InProcessValidator))
    }

    pub fn engine_with_validator(&self, validator: Arc<dyn ModuleValidator>) -> Arc<Engine> {
        let loader = CountingLoader {
            inner: RegistryLoader::new(self.registry.clone()),
            loads: Arc::clone(&self.loads),
        };
        Engine::builder(self.config.clone())
            .with_registry(self.registry.clone())
            .with_loader(Arc::new(loader))
            .with_validator(validator)
            .build()
            .unwrap()
    }

    pub fn native_loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn hooks(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Hook names in order, for entries whose type is `type_name`
    pub fn hooks_of(&self, type_name: &str) -> Vec<String> {
        let prefix = format!("{}:", type_name);
        self.hooks()
            .iter()
            .filter_map(|line| line.strip_prefix(&prefix))
            .map(|rest| rest.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_hooks(&self) {
        self.log.lock().unwrap().clear();
    }
}

/// Write `image` to `<dir>/<stem>.amod`
pub fn write_image(dir: &Path, stem: &str, image: &ModuleImage) -> PathBuf {
    let path = dir.join(format!("{}.amod", stem));
    std::fs::write(&path, image.to_bytes().unwrap()).unwrap();
    path
}

/// Single-type image for `contract`
pub fn simple_image(name: &str, contract: ContractKind, hotloadable: bool) -> ModuleImage {
    ModuleImage::new(name, "1.0.0").with_type(format!("{}.Entry", name), contract, hotloadable)
}
