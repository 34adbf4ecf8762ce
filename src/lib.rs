//! Addon Host - dynamic loading and hot reload of addon modules
//!
//! This crate lets a long-running host add, update and remove addon code at
//! runtime. Candidate images are validated in a sandboxed child process,
//! given a process-unique identity, loaded through a content-addressed
//! cache and activated through a small capability contract.
//!
//! ## Components
//!
//! 1. `ContentCache` - loads byte-identical images once
//! 2. `ReferenceResolver` - resolves references against an ordered search path
//! 3. `SandboxValidator` - checks declared references before loading
//! 4. `ModuleRewriter` - assigns fresh identities and re-links siblings
//! 5. `ExtensionManager` / `ModuleManager` - drive the per-file lifecycle
//!
//! ## Example
//!
//! ```rust,no_run
//! use addon_host::{AddonHost, Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::from_json_file(std::path::Path::new("engine.json"))?;
//! addon_host::utils::init_logging_from_config(config.logging.as_ref());
//!
//! let engine = Engine::builder(config).build()?;
//! let host = Arc::new(AddonHost::new(engine));
//! host.load_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod module;
pub mod utils;

// Re-export config module
pub use config::*;

pub use module::{
    Addon, AddonContext, AddonError, AddonHandle, AddonHost, AddonRegistry, Engine,
    EngineBuilder, EventBus, LifecycleEvent, LifecycleEventKind, ModuleError, ModuleState,
    WatchEvent,
};
