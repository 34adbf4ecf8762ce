//! Lifecycle event bus
//!
//! Managers publish lifecycle events here; subscribers receive them on
//! unbounded channels. Publishing never blocks, so it is safe from addon
//! hooks and from synchronous code.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::module::traits::{AddonFlavor, AddonHandle};

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    ExtensionLoaded,
    ExtensionLoadFailed,
    ExtensionUnloaded,
    ExtensionUnloadFailed,
    ModuleLoaded,
    ModuleLoadFailed,
    ModuleUnloaded,
    ModuleUnloadFailed,
}

impl LifecycleEventKind {
    pub const ALL: [LifecycleEventKind; 8] = [
        LifecycleEventKind::ExtensionLoaded,
        LifecycleEventKind::ExtensionLoadFailed,
        LifecycleEventKind::ExtensionUnloaded,
        LifecycleEventKind::ExtensionUnloadFailed,
        LifecycleEventKind::ModuleLoaded,
        LifecycleEventKind::ModuleLoadFailed,
        LifecycleEventKind::ModuleUnloaded,
        LifecycleEventKind::ModuleUnloadFailed,
    ];

    pub fn loaded(flavor: AddonFlavor) -> Self {
        match flavor {
            AddonFlavor::Extension => Self::ExtensionLoaded,
            AddonFlavor::Module => Self::ModuleLoaded,
        }
    }

    pub fn load_failed(flavor: AddonFlavor) -> Self {
        match flavor {
            AddonFlavor::Extension => Self::ExtensionLoadFailed,
            AddonFlavor::Module => Self::ModuleLoadFailed,
        }
    }

    pub fn unloaded(flavor: AddonFlavor) -> Self {
        match flavor {
            AddonFlavor::Extension => Self::ExtensionUnloaded,
            AddonFlavor::Module => Self::ModuleUnloaded,
        }
    }

    pub fn unload_failed(flavor: AddonFlavor) -> Self {
        match flavor {
            AddonFlavor::Extension => Self::ExtensionUnloadFailed,
            AddonFlavor::Module => Self::ModuleUnloadFailed,
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One published event
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub file: PathBuf,
    /// Activated addon, where applicable
    pub addon: Option<AddonHandle>,
    /// Public types of the module, where applicable
    pub shared_types: Vec<String>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, file: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            file: file.into(),
            addon: None,
            shared_types: Vec::new(),
        }
    }

    pub fn with_addon(mut self, addon: Option<AddonHandle>, shared_types: Vec<String>) -> Self {
        self.addon = addon;
        self.shared_types = shared_types;
        self
    }
}

/// Subscriber id
pub type SubscriptionId = u64;

#[derive(Default)]
struct BusState {
    next_id: SubscriptionId,
    subscribers: HashMap<LifecycleEventKind, Vec<SubscriptionId>>,
    channels: HashMap<SubscriptionId, mpsc::UnboundedSender<LifecycleEvent>>,
}

/// Event subscription manager
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `kinds`
    pub fn subscribe(
        &self,
        kinds: &[LifecycleEventKind],
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        state.channels.insert(id, tx);
        for kind in kinds {
            state.subscribers.entry(*kind).or_default().push(id);
        }
        info!("Subscriber {} listening for {:?}", id, kinds);
        (id, rx)
    }

    /// Subscribe to every kind
    pub fn subscribe_all(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        self.subscribe(&LifecycleEventKind::ALL)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        debug!("Subscriber {} unsubscribing", id);
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.channels.remove(&id);
        for list in state.subscribers.values_mut() {
            list.retain(|s| *s != id);
        }
    }

    /// Deliver `event` to its subscribers; returns how many received it
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        debug!("Publishing {} for {}", event.kind, event.file.display());

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let ids = state.subscribers.get(&event.kind).cloned().unwrap_or_default();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for id in ids {
            if let Some(sender) = state.channels.get(&id) {
                if sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(id);
                }
            }
        }

        // Clean up dropped receivers
        for id in closed {
            warn!("Dropping closed subscriber {}", id);
            state.channels.remove(&id);
            for list in state.subscribers.values_mut() {
                list.retain(|s| *s != id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self, kind: LifecycleEventKind) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.subscribers.get(&kind).map_or(0, |l| l.len())
    }
}
