//! Module discovery
//!
//! Scans an addon directory for module images and reads their headers.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::module::image::{self, ImageHeader, ModuleImage};
use crate::module::traits::ModuleError;
use crate::utils::log_error;

/// Discovered module information
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    /// Path to the image
    pub path: PathBuf,
    /// Decoded header; `None` when the file could not be read as an image
    pub header: Option<ImageHeader>,
}

impl DiscoveredModule {
    /// Logical name: the declared identity, or the file stem when unreadable
    pub fn name(&self) -> String {
        match self.header {
            Some(ref h) => h.identity.name.clone(),
            None => file_stem(&self.path),
        }
    }

    /// Declared reference names
    pub fn references(&self) -> Vec<String> {
        self.header
            .as_ref()
            .map(|h| h.references.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read (and unseal) the header of an image file
pub fn read_header(path: &Path) -> Result<ImageHeader, ModuleError> {
    header_of(&fs::read(path)?)
}

/// Header of in-memory image bytes, sealed or not
pub fn header_of(bytes: &[u8]) -> Result<ImageHeader, ModuleError> {
    let header = if image::is_sealed(bytes) {
        ModuleImage::parse_header(&image::unseal(bytes)?)?
    } else {
        ModuleImage::parse_header(bytes)?
    };
    Ok(header)
}

/// Module discovery scanner
pub struct ModuleDiscovery {
    /// Directory to scan
    modules_dir: PathBuf,
}

impl ModuleDiscovery {
    /// Create a new module discovery scanner
    pub fn new<P: AsRef<Path>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
        }
    }

    /// Module image paths in the directory, sorted by file name
    pub fn module_files(&self) -> Result<Vec<PathBuf>, ModuleError> {
        if !self.modules_dir.exists() {
            debug!(
                "Modules directory does not exist, creating: {:?}",
                self.modules_dir
            );
            fs::create_dir_all(&self.modules_dir)?;
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.modules_dir)? {
            let path = entry?.path();
            if path.is_file() && image::is_module_file(&path) {
                files.push(path);
            }
        }
        // Stable order regardless of what the OS enumerates
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Discover all modules in the directory
    pub fn discover_modules(&self) -> Result<Vec<DiscoveredModule>, ModuleError> {
        info!("Discovering modules in {:?}", self.modules_dir);

        let modules: Vec<_> = self
            .module_files()?
            .into_iter()
            .map(|path| {
                let header = log_error(
                    || read_header(&path),
                    &format!("Failed to read header of {:?}", path),
                );
                DiscoveredModule { path, header }
            })
            .collect();

        info!("Discovered {} modules", modules.len());
        Ok(modules)
    }
}
