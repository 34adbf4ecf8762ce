//! Module loading system
//!
//! Binds loaded images to the addon types linked into the host.

pub mod loader;

pub use loader::{
    AddonFactory, AddonRegistry, LoadedModule, ModuleHandle, NativeLoader, RegistryLoader,
};
