//! Reference resolution against an ordered search path
//!
//! A name resolves to the first image, in directory order, whose file stem
//! equals the name. Files within one directory are visited in file name
//! order. Definitions are cached by name until [`ReferenceResolver::dispose`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::module::image::{self, ImageHeader, ModuleIdentity, ModuleReference};
use crate::module::registry::discovery::{file_stem, read_header};
use crate::module::traits::ModuleError;

/// Parsed, not loaded, module definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDefinition {
    pub path: PathBuf,
    pub identity: ModuleIdentity,
    pub references: Vec<ModuleReference>,
    /// Recorded by a load (identity rewritten) rather than found on disk
    pub registered: bool,
}

impl ResolvedDefinition {
    fn new(path: PathBuf, header: ImageHeader, registered: bool) -> Self {
        Self {
            path,
            identity: header.identity,
            references: header.references,
            registered,
        }
    }
}

/// Outcome of resolving one image's reference table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Linkage {
    /// Reference name -> identity of the loaded sibling it now points at
    pub renames: HashMap<String, String>,
    /// References no search directory could satisfy
    pub unresolved: Vec<String>,
}

/// Name-keyed resolver shared by every manager
pub struct ReferenceResolver {
    search_dirs: Vec<PathBuf>,
    cache: RwLock<HashMap<String, Arc<ResolvedDefinition>>>,
}

impl ReferenceResolver {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.search_dirs())
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Resolve `name`, scanning the search path on a cache miss
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedDefinition>, ModuleError> {
        if let Some(found) = self.cached(name) {
            return Ok(found);
        }

        let definition = self
            .scan(name)
            .ok_or_else(|| ModuleError::ModuleNotFound(format!("Reference not found: {}", name)))?;

        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        // A concurrent resolve may have won; keep its entry
        let entry = cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(definition));
        debug!("Resolved {} -> {}", name, entry.path.display());
        Ok(Arc::clone(entry))
    }

    fn scan(&self, name: &str) -> Option<ResolvedDefinition> {
        for dir in &self.search_dirs {
            for path in sorted_images(dir) {
                if file_stem(&path) != name {
                    continue;
                }
                match read_header(&path) {
                    Ok(header) => return Some(ResolvedDefinition::new(path, header, false)),
                    Err(e) => {
                        warn!("Skipping unreadable candidate {}: {}", path.display(), e);
                    }
                }
            }
        }
        None
    }

    /// Record a just-loaded module under its logical name
    pub fn register(&self, name: &str, path: &Path, header: ImageHeader) {
        let definition = Arc::new(ResolvedDefinition::new(path.to_path_buf(), header, true));
        self.cache
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), definition);
    }

    pub fn cached(&self, name: &str) -> Option<Arc<ResolvedDefinition>> {
        self.cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    /// Drop one name, e.g. after its module was unloaded
    pub fn forget(&self, name: &str) -> bool {
        self.cache
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name)
            .is_some()
    }

    /// Logical name -> identity for every registered definition that was renamed
    pub fn renamed(&self) -> HashMap<String, String> {
        self.cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(name, def)| def.registered && def.identity.name != **name)
            .map(|(name, def)| (name.clone(), def.identity.name.clone()))
            .collect()
    }

    /// Resolve every reference of `module`
    ///
    /// Missing references are reported, not fatal: the loader decides
    /// whether the image can run without them.
    pub fn link(&self, module: &str, references: &[ModuleReference]) -> Linkage {
        let mut linkage = Linkage::default();
        for reference in references {
            if reference.name == module {
                continue;
            }
            match self.resolve(&reference.name) {
                Ok(def) => {
                    if def.registered && def.identity.name != reference.name {
                        linkage
                            .renames
                            .insert(reference.name.clone(), def.identity.name.clone());
                    }
                }
                Err(e) => {
                    warn!("{} references {}: {}", module, reference.name, e);
                    linkage.unresolved.push(reference.name.clone());
                }
            }
        }
        linkage
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear every cached definition
    pub fn dispose(&self) {
        self.cache
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

fn sorted_images(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && image::is_module_file(p))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}
