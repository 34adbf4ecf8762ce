//! Manifest validation
//!
//! Checks module.toml manifests for structure before they are packed into images.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::module::image::ContractKind;
use crate::module::registry::manifest::{ManifestType, ModuleManifest};

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Manifest is valid
    Valid,
    /// Manifest is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Manifest validator
pub struct ManifestValidator {
    /// Maximum length of module and type names
    max_name_len: usize,
}

impl ManifestValidator {
    /// Create a new manifest validator
    pub fn new() -> Self {
        Self { max_name_len: 128 }
    }

    /// Validate a module manifest
    pub fn validate(&self, manifest: &ModuleManifest) -> ValidationResult {
        let mut errors = Vec::new();

        if manifest.version.is_empty() {
            errors.push("Module version cannot be empty".to_string());
        } else if !self.is_valid_version(&manifest.version) {
            errors.push(format!(
                "Invalid version format: {} (expected semantic versioning)",
                manifest.version
            ));
        }

        // Identities are rewritten to `<name>_<suffix>`, so names stay path- and symbol-safe
        if !self.is_valid_name(&manifest.name) {
            errors.push(format!(
                "Invalid module name: {} (must be alphanumeric with dots/dashes/underscores)",
                manifest.name
            ));
        }

        if let Err(ref_errors) = self.validate_references(&manifest.name, &manifest.references) {
            errors.extend(ref_errors);
        }

        if let Err(type_errors) = self.validate_types(&manifest.types) {
            errors.extend(type_errors);
        }

        if errors.is_empty() {
            debug!("Manifest validation passed for module: {}", manifest.name);
            ValidationResult::Valid
        } else {
            warn!(
                "Manifest validation failed for module {}: {:?}",
                manifest.name, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    /// Validate module/type name format
    #[inline]
    fn is_valid_name(&self, name: &str) -> bool {
        // Fast checks first
        if name.is_empty() || name.len() > self.max_name_len {
            return false;
        }

        // Must start with alphanumeric
        if !name.chars().next().map_or(false, |c| c.is_alphanumeric()) {
            return false;
        }

        name.chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    }

    /// Validate version format (semantic versioning)
    ///
    /// Accepts: major.minor[.patch[.build]][-prerelease][+metadata]
    #[inline]
    fn is_valid_version(&self, version: &str) -> bool {
        if version.is_empty() {
            return false;
        }

        let base = version.split('+').next().unwrap_or(version);
        let version_part = base.split('-').next().unwrap_or(base);

        let nums: Vec<&str> = version_part.split('.').collect();
        if nums.len() < 2 || nums.len() > 4 {
            return false;
        }

        nums.iter().all(|n| {
            !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && n.parse::<u32>().is_ok()
        })
    }

    fn validate_references(
        &self,
        own_name: &str,
        references: &BTreeMap<String, String>,
    ) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, version) in references {
            if name == own_name {
                errors.push(format!("Module {} references itself", name));
            }
            if !self.is_valid_name(name) {
                errors.push(format!("Invalid reference name: {}", name));
            }
            if !self.is_valid_version(version) {
                errors.push(format!(
                    "Invalid reference version format: {} (for reference: {})",
                    version, name
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_types(&self, types: &[ManifestType]) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for t in types {
            if !self.is_valid_name(&t.name) {
                errors.push(format!("Invalid type name: {}", t.name));
            }
            if !seen.insert(t.name.as_str()) {
                errors.push(format!("Duplicate type: {}", t.name));
            }
            if t.hotloadable && t.contract == ContractKind::None {
                errors.push(format!(
                    "Type {} is marked hotloadable but implements no contract",
                    t.name
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}
