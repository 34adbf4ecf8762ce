//! Content-addressed cache of loaded modules
//!
//! Byte-identical input is loaded once per process. Entries are never
//! evicted; [`ContentCache::clear`] exists for engine disposal only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::module::cache::hashing::ContentHash;
use crate::module::image;
use crate::module::loader::{ModuleHandle, NativeLoader};
use crate::module::traits::ModuleError;

/// One cached load
#[derive(Debug)]
pub struct CacheEntry {
    pub hash: ContentHash,
    /// Logical name the bytes were first loaded under
    pub name: String,
    /// Unsealed bytes handed to the loader
    pub raw: Vec<u8>,
    pub handle: ModuleHandle,
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ContentHash, Arc<CacheEntry>>,
    next_seq: u64,
}

/// Process-wide cache keyed by content hash
pub struct ContentCache {
    loader: Arc<dyn NativeLoader>,
    state: Mutex<CacheState>,
}

impl ContentCache {
    pub fn new(loader: Arc<dyn NativeLoader>) -> Self {
        Self {
            loader,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Return the entry for `raw`, loading it on first sight
    ///
    /// The hash covers the input as given, so a sealed image and its plain
    /// form are distinct entries. A loader failure caches nothing.
    pub fn get_or_load(&self, name: &str, raw: &[u8]) -> Result<Arc<CacheEntry>, ModuleError> {
        let hash = ContentHash::of(raw);

        // Held across the load so one hash is never loaded twice
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = state.entries.get(&hash) {
            debug!("Content cache hit for {} ({})", name, hash);
            return Ok(Arc::clone(entry));
        }

        let bytes = if image::is_sealed(raw) {
            image::unseal(raw).map_err(|e| ModuleError::LoadFailure(format!("{}: {}", name, e)))?
        } else {
            raw.to_vec()
        };

        let handle = self.loader.load(&bytes).map_err(|e| match e {
            ModuleError::LoadFailure(_) => e,
            other => ModuleError::LoadFailure(format!("{}: {}", name, other)),
        })?;

        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = Arc::new(CacheEntry {
            hash,
            name: name.to_string(),
            raw: bytes,
            handle,
            seq,
        });
        state.entries.insert(hash, Arc::clone(&entry));
        debug!("Content cache stored {} ({})", name, hash);
        Ok(entry)
    }

    /// Bytes most recently cached under `name`
    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .entries
            .values()
            .filter(|e| e.name == name)
            .max_by_key(|e| e.seq)
            .map(|e| e.raw.clone())
    }

    pub fn get(&self, hash: &ContentHash) -> Option<Arc<CacheEntry>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.entries.get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entries
            .clear();
    }
}
