//! Addon system traits and interfaces
//!
//! Defines the capability contract that loaded addons implement and the
//! error and state types shared by the engine and the lifecycle managers.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::module::api::services::HostServices;

/// Per-file lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// Not tracked
    Unloaded,
    /// Waiting for the sandboxed validator verdict
    Validating,
    /// Assigning a fresh identity and re-linking references
    Rewriting,
    /// Handing bytes to the native loader (through the content cache)
    NativeLoading,
    /// Running `awake`/`on_loaded`
    Activating,
    /// Activated and tracked
    Loaded,
    /// Running `on_unloaded`
    Unloading,
    /// Record dropped after an unload
    Removed,
    /// Last transition failed
    Failed(String),
}

/// Which manager owns a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonFlavor {
    /// Capability-restricted addon
    Extension,
    /// Full-capability addon
    Module,
}

impl fmt::Display for AddonFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddonFlavor::Extension => write!(f, "extension"),
            AddonFlavor::Module => write!(f, "module"),
        }
    }
}

/// Context passed to every lifecycle hook
#[derive(Debug, Clone)]
pub struct AddonContext {
    /// File the addon was loaded from
    pub file: PathBuf,
    /// Who asked for the transition (watcher, operator command, startup scan)
    pub requester: String,
    /// Process-unique identity of the loaded image
    pub identity: String,
}

/// Failure reported by an addon hook
#[derive(Debug, Clone, Error)]
pub enum AddonError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// Capability contract implemented by loadable addons
///
/// `awake` and `on_loaded` run on activation, `on_unloaded` before the
/// record is dropped. Module-flavor addons also get `on_enable` right
/// after `on_loaded`.
pub trait Addon: Send {
    fn awake(&mut self, _context: &AddonContext) -> Result<(), AddonError> {
        Ok(())
    }

    fn on_loaded(&mut self, context: &AddonContext) -> Result<(), AddonError>;

    fn on_unloaded(&mut self, context: &AddonContext) -> Result<(), AddonError>;

    fn on_enable(&mut self, _context: &AddonContext) -> Result<(), AddonError> {
        Ok(())
    }

    /// Receive host services before activation
    fn hydrate(&mut self, _services: &HostServices) {}
}

/// Shared handle to an instantiated addon
///
/// Hooks run under the handle's lock with panics caught, so a misbehaving
/// addon surfaces as an [`AddonError`] instead of unwinding into the host.
#[derive(Clone)]
pub struct AddonHandle {
    type_name: Arc<str>,
    inner: Arc<Mutex<Box<dyn Addon>>>,
}

impl AddonHandle {
    pub fn new(type_name: impl Into<Arc<str>>, addon: Box<dyn Addon>) -> Self {
        Self {
            type_name: type_name.into(),
            inner: Arc::new(Mutex::new(addon)),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Run `f` against the addon, converting a panic into `AddonError::Panicked`
    pub fn invoke<F>(&self, hook: &str, f: F) -> Result<(), AddonError>
    where
        F: FnOnce(&mut dyn Addon) -> Result<(), AddonError>,
    {
        // A panic in an earlier hook poisons the lock; the addon is still usable
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match catch_unwind(AssertUnwindSafe(|| f(&mut **guard))) {
            Ok(result) => result,
            Err(payload) => Err(AddonError::Panicked(format!(
                "{} in {}: {}",
                hook,
                self.type_name,
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Same underlying instance
    pub fn ptr_eq(&self, other: &AddonHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AddonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonHandle")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Addon engine errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Validation rejected {path}: {reason}")]
    ValidationRejected { path: String, reason: String },

    #[error("Load failure: {0}")]
    LoadFailure(String),

    #[error("Activation failed: {0}")]
    ActivationFailure(String),

    #[error("Hotload refused: {0}")]
    HotloadRefused(String),

    #[error("Unsupported module format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid module image: {0}")]
    InvalidImage(String),

    #[error("Invalid module manifest: {0}")]
    InvalidManifest(String),

    #[error("Sandbox error: {0}")]
    SandboxError(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Timeout waiting for validator")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<bincode::Error> for ModuleError {
    fn from(e: bincode::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    impl Addon for Exploding {
        fn on_loaded(&mut self, _context: &AddonContext) -> Result<(), AddonError> {
            panic!("boom");
        }

        fn on_unloaded(&mut self, _context: &AddonContext) -> Result<(), AddonError> {
            Err(AddonError::Failed("refused".to_string()))
        }
    }

    fn context() -> AddonContext {
        AddonContext {
            file: PathBuf::from("x.amod"),
            requester: "test".to_string(),
            identity: "x_1".to_string(),
        }
    }

    #[test]
    fn test_invoke_catches_panics_and_stays_usable() {
        let handle = AddonHandle::new("Exploding", Box::new(Exploding));
        let ctx = context();

        let err = handle.invoke("on_loaded", |a| a.on_loaded(&ctx)).unwrap_err();
        assert!(matches!(err, AddonError::Panicked(ref m) if m.contains("boom")));

        // Lock was poisoned by the panic; later hooks still run
        let err = handle
            .invoke("on_unloaded", |a| a.on_unloaded(&ctx))
            .unwrap_err();
        assert!(matches!(err, AddonError::Failed(_)));
        assert!(handle.invoke("awake", |a| a.awake(&ctx)).is_ok());
    }

    #[test]
    fn test_clones_share_instance() {
        let a = AddonHandle::new("Exploding", Box::new(Exploding));
        let b = a.clone();
        let c = AddonHandle::new("Exploding", Box::new(Exploding));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(b.type_name(), "Exploding");
    }
}
