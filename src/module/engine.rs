//! Process-wide engine state
//!
//! One [`Engine`] is built at startup and shared by every manager. It owns
//! the content cache, the reference resolver, the validator and the event bus.

use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::module::api::events::EventBus;
use crate::module::cache::ContentCache;
use crate::module::loader::{AddonRegistry, NativeLoader, RegistryLoader};
use crate::module::registry::ReferenceResolver;
use crate::module::rewriter::ModuleRewriter;
use crate::module::sandbox::{ModuleValidator, SandboxValidator};
use crate::module::validation::ValidationPolicy;

/// Shared engine state
pub struct Engine {
    config: EngineConfig,
    policy: ValidationPolicy,
    cache: ContentCache,
    resolver: ReferenceResolver,
    validator: Arc<dyn ModuleValidator>,
    rewriter: ModuleRewriter,
    registry: AddonRegistry,
    events: Arc<EventBus>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn validator(&self) -> &dyn ModuleValidator {
        self.validator.as_ref()
    }

    pub fn rewriter(&self) -> &ModuleRewriter {
        &self.rewriter
    }

    pub fn registry(&self) -> &AddonRegistry {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Cached bytes of the module most recently loaded as `name`
    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.cache.read(name)
    }

    /// Clear the process-wide caches
    pub fn dispose(&self) {
        info!(
            "Disposing engine ({} cached images, {} resolved references)",
            self.cache.len(),
            self.resolver.len()
        );
        self.resolver.dispose();
        self.cache.clear();
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    loader: Option<Arc<dyn NativeLoader>>,
    validator: Option<Arc<dyn ModuleValidator>>,
    registry: AddonRegistry,
    events: Option<Arc<EventBus>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            loader: None,
            validator: None,
            registry: AddonRegistry::new(),
            events: None,
        }
    }

    /// Replace the default [`RegistryLoader`]
    pub fn with_loader(mut self, loader: Arc<dyn NativeLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Replace the default [`SandboxValidator`]
    pub fn with_validator(mut self, validator: Arc<dyn ModuleValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_registry(mut self, registry: AddonRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> anyhow::Result<Arc<Engine>> {
        self.config.validate()?;

        let policy = ValidationPolicy::from_config(&self.config.validation);
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(RegistryLoader::new(self.registry.clone())));
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(SandboxValidator::from_config(&self.config.validation)));

        info!(
            "Engine search path: {:?}",
            self.config.search_dirs()
        );

        Ok(Arc::new(Engine {
            resolver: ReferenceResolver::from_config(&self.config),
            cache: ContentCache::new(loader),
            policy,
            validator,
            rewriter: ModuleRewriter::new(),
            registry: self.registry,
            events: self.events.unwrap_or_default(),
            config: self.config,
        }))
    }
}
