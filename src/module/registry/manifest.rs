//! Module manifest parsing
//!
//! Handles parsing module.toml manifests and compiling them into images.

use crate::module::image::{ContractKind, ModuleImage, ModuleReference, TypeEntry};
use crate::module::traits::ModuleError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Module manifest (module.toml structure)
///
/// ```toml
/// name = "Alpha"
/// version = "1.2.0"
/// payload = "alpha.bin"
///
/// [references]
/// Core = "2.0"
///
/// [[types]]
/// name = "Alpha.Entry"
/// contract = "module"
/// hotloadable = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name
    pub name: String,
    /// Module version (semantic versioning)
    pub version: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Referenced modules (name -> version)
    #[serde(default)]
    pub references: BTreeMap<String, String>,
    /// Declared types
    #[serde(default)]
    pub types: Vec<ManifestType>,
    /// Payload file, relative to the manifest
    pub payload: Option<PathBuf>,
}

/// `[[types]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestType {
    pub name: String,
    #[serde(default)]
    pub contract: ContractKind,
    #[serde(default)]
    pub hotloadable: bool,
    #[serde(default = "default_public")]
    pub public: bool,
}

fn default_public() -> bool {
    true
}

impl ModuleManifest {
    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to read manifest file: {}", e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse manifest TOML
    pub fn from_toml(contents: &str) -> Result<Self, ModuleError> {
        let manifest: ModuleManifest = toml::from_str(contents).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to parse manifest TOML: {}", e))
        })?;

        // Validate required fields
        if manifest.name.is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Module name cannot be empty".to_string(),
            ));
        }

        Ok(manifest)
    }

    /// Build the image; `base_dir` anchors the payload path
    pub fn to_image(&self, base_dir: &Path) -> Result<ModuleImage, ModuleError> {
        let payload = match self.payload {
            Some(ref rel) => std::fs::read(base_dir.join(rel))?,
            None => Vec::new(),
        };

        let mut image = ModuleImage::new(&self.name, &self.version).with_payload(payload);
        image.references = self
            .references
            .iter()
            .map(|(name, version)| ModuleReference {
                name: name.clone(),
                version: version.clone(),
            })
            .collect();
        image.types = self
            .types
            .iter()
            .map(|t| TypeEntry {
                name: t.name.clone(),
                contract: t.contract,
                hotloadable: t.hotloadable,
                public: t.public,
            })
            .collect();
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name = "Alpha"
version = "1.2.0"

[references]
Core = "2.0"

[[types]]
name = "Alpha.Entry"
contract = "patch_hooks"
hotloadable = true

[[types]]
name = "Alpha.Internal"
public = false
"#;

    #[test]
    fn test_manifest_to_image() {
        let manifest = ModuleManifest::from_toml(MANIFEST).unwrap();
        let image = manifest.to_image(Path::new(".")).unwrap();
        assert_eq!(image.identity.name, "Alpha");
        assert_eq!(image.references[0].name, "Core");
        assert_eq!(image.types[0].contract, ContractKind::PatchHooks);
        assert!(image.types[0].hotloadable);
        assert_eq!(image.types[1].contract, ContractKind::None);
        assert_eq!(image.shared_types(), vec!["Alpha.Entry"]);
    }

    #[test]
    fn test_payload_is_read_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("body.bin"), [9u8, 9, 9]).unwrap();
        let manifest = ModuleManifest::from_toml(
            "name = \"P\"\nversion = \"0.1\"\npayload = \"body.bin\"\n",
        )
        .unwrap();
        assert_eq!(manifest.to_image(dir.path()).unwrap().payload, vec![9, 9, 9]);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ModuleManifest::from_toml("name = \"\"\nversion = \"1.0\"\n").is_err());
    }
}
