//! Native loading primitive
//!
//! Rust has no safe way to load foreign code into a running process, so
//! addon code is linked into the host and registered by type name. An image
//! names the types it provides; loading it binds those names to the
//! registered factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::module::image::{ModuleIdentity, ModuleImage};
use crate::module::traits::{Addon, ModuleError};

/// A loaded module image
pub trait LoadedModule: Send + Sync + fmt::Debug {
    /// Identity after rewriting
    fn identity(&self) -> &ModuleIdentity;

    /// The decoded image
    fn image(&self) -> &ModuleImage;

    /// Create an instance of `type_name`, if the module provides it
    fn instantiate(&self, type_name: &str) -> Option<Box<dyn Addon>>;
}

/// Shared handle to a loaded module
pub type ModuleHandle = Arc<dyn LoadedModule>;

/// Turns raw image bytes into a loaded module
pub trait NativeLoader: Send + Sync {
    fn load(&self, bytes: &[u8]) -> Result<ModuleHandle, ModuleError>;
}

/// Constructor for one addon type
pub type AddonFactory = Arc<dyn Fn() -> Box<dyn Addon> + Send + Sync>;

/// Addon types linked into the host, by type name
#[derive(Clone, Default)]
pub struct AddonRegistry {
    factories: Arc<RwLock<HashMap<String, AddonFactory>>>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `type_name`
    pub fn register<F>(&self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Addon> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!("Registered addon type {}", type_name);
        self.factories
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(type_name, Arc::new(factory));
    }

    pub fn unregister(&self, type_name: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(type_name)
            .is_some()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(type_name)
    }

    pub fn create(&self, type_name: &str) -> Option<Box<dyn Addon>> {
        // Clone the factory out so it runs without the lock
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(type_name)
            .cloned()?;
        Some(factory())
    }
}

impl fmt::Debug for AddonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.read().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<_> = factories.keys().collect();
        names.sort();
        f.debug_struct("AddonRegistry").field("types", &names).finish()
    }
}

/// Loader backed by an [`AddonRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryLoader {
    registry: AddonRegistry,
}

impl RegistryLoader {
    pub fn new(registry: AddonRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AddonRegistry {
        &self.registry
    }
}

impl NativeLoader for RegistryLoader {
    fn load(&self, bytes: &[u8]) -> Result<ModuleHandle, ModuleError> {
        let image = ModuleImage::parse(bytes)
            .map_err(|e| ModuleError::LoadFailure(format!("Rejected image: {}", e)))?;
        debug!(
            "Loaded image {} ({} types, {} payload bytes)",
            image.identity,
            image.types.len(),
            image.payload.len()
        );
        Ok(Arc::new(RegisteredModule {
            image,
            registry: self.registry.clone(),
        }))
    }
}

#[derive(Debug)]
struct RegisteredModule {
    image: ModuleImage,
    registry: AddonRegistry,
}

impl LoadedModule for RegisteredModule {
    fn identity(&self) -> &ModuleIdentity {
        &self.image.identity
    }

    fn image(&self) -> &ModuleImage {
        &self.image
    }

    fn instantiate(&self, type_name: &str) -> Option<Box<dyn Addon>> {
        if !self.image.types.iter().any(|t| t.name == type_name) {
            return None;
        }
        self.registry.create(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::image::ContractKind;
    use crate::module::traits::{AddonContext, AddonError};

    struct Noop;

    impl Addon for Noop {
        fn on_loaded(&mut self, _context: &AddonContext) -> Result<(), AddonError> {
            Ok(())
        }

        fn on_unloaded(&mut self, _context: &AddonContext) -> Result<(), AddonError> {
            Ok(())
        }
    }

    #[test]
    fn test_instantiate_only_declared_registered_types() {
        let registry = AddonRegistry::new();
        registry.register("A.Entry", || Box::new(Noop));
        registry.register("Other.Entry", || Box::new(Noop));

        let bytes = ModuleImage::new("A", "1.0")
            .with_type("A.Entry", ContractKind::Module, false)
            .with_type("A.Missing", ContractKind::Module, false)
            .to_bytes()
            .unwrap();
        let handle = RegistryLoader::new(registry).load(&bytes).unwrap();

        assert_eq!(handle.identity().name, "A");
        assert!(handle.instantiate("A.Entry").is_some());
        assert!(handle.instantiate("A.Missing").is_none());
        // Registered but not part of this image
        assert!(handle.instantiate("Other.Entry").is_none());
    }

    #[test]
    fn test_malformed_bytes_are_load_failures() {
        let loader = RegistryLoader::new(AddonRegistry::new());
        assert!(matches!(
            loader.load(b"\x00\x01garbage"),
            Err(ModuleError::LoadFailure(_))
        ));
    }

    #[test]
    fn test_unregister() {
        let registry = AddonRegistry::new();
        registry.register("T", || Box::new(Noop));
        assert!(registry.contains("T"));
        assert!(registry.unregister("T"));
        assert!(!registry.unregister("T"));
        assert!(registry.create("T").is_none());
    }
}
