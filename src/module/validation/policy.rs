//! Reference policy checks
//!
//! Deny patterns are regular expressions matched anywhere in a reference
//! name; the allow list holds exact names. Only the reference table is
//! decoded, never the type table or payload.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::config::ValidationConfig;
use crate::module::image::{self, ModuleImage, ModuleReference};
use crate::module::traits::ModuleError;

/// Allow/deny policy for declared references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Checked first, in order; any match rejects
    #[serde(default)]
    pub deny: Vec<String>,
    /// When present, every reference must be listed
    #[serde(default)]
    pub allow: Option<Vec<String>>,
}

impl ValidationPolicy {
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            deny: config.deny_patterns.clone(),
            allow: config.allow_list.clone(),
        }
    }

    /// Compile deny patterns
    pub fn compile(&self) -> Result<CompiledPolicy, ModuleError> {
        let deny = self
            .deny
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ModuleError::SandboxError(format!("Invalid deny pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let allow = self
            .allow
            .as_ref()
            .map(|names| names.iter().cloned().collect::<HashSet<_>>());
        Ok(CompiledPolicy { deny, allow })
    }
}

/// Policy ready for matching
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    deny: Vec<Regex>,
    allow: Option<HashSet<String>>,
}

impl CompiledPolicy {
    /// `Err(reason)` on the first denied or unlisted reference
    pub fn check(&self, references: &[ModuleReference]) -> Result<(), String> {
        for reference in references {
            if let Some(pattern) = self.deny.iter().find(|re| re.is_match(&reference.name)) {
                return Err(format!(
                    "reference '{}' matches deny pattern '{}'",
                    reference.name,
                    pattern.as_str()
                ));
            }
        }

        if let Some(ref allow) = self.allow {
            if let Some(reference) = references.iter().find(|r| !allow.contains(&r.name)) {
                return Err(format!(
                    "reference '{}' is not in the allow list",
                    reference.name
                ));
            }
        }

        Ok(())
    }
}

/// Outcome of one inspection; the validator child prints it as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// Declared reference names, when the table could be read
    #[serde(default)]
    pub references: Vec<String>,
}

impl Verdict {
    pub fn accept(references: Vec<String>) -> Self {
        Self {
            accepted: true,
            reason: None,
            references,
        }
    }

    pub fn reject(reason: impl Into<String>, references: Vec<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            references,
        }
    }
}

/// Inspect raw (possibly sealed) image bytes
pub fn inspect_bytes(bytes: &[u8], policy: &CompiledPolicy) -> Verdict {
    let plain;
    let bytes = if image::is_sealed(bytes) {
        match image::unseal(bytes) {
            Ok(b) => {
                plain = b;
                plain.as_slice()
            }
            Err(e) => return Verdict::reject(format!("unreadable sealed image: {}", e), Vec::new()),
        }
    } else {
        bytes
    };

    let header = match ModuleImage::parse_header(bytes) {
        Ok(h) => h,
        Err(e) => return Verdict::reject(format!("unparsable image: {}", e), Vec::new()),
    };

    let names = header.references.iter().map(|r| r.name.clone()).collect();
    match policy.check(&header.references) {
        Ok(()) => {
            debug!(
                "{} passed reference policy ({} references)",
                header.identity.name,
                header.references.len()
            );
            Verdict::accept(names)
        }
        Err(reason) => Verdict::reject(reason, names),
    }
}

/// Inspect an image file
pub fn inspect_file(path: &Path, policy: &CompiledPolicy) -> Verdict {
    match std::fs::read(path) {
        Ok(bytes) => inspect_bytes(&bytes, policy),
        Err(e) => Verdict::reject(format!("cannot read {}: {}", path.display(), e), Vec::new()),
    }
}
