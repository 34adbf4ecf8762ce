//! Identity rewriting
//!
//! Every load gets a fresh identity `<name>_<uuid>`, so an instance still
//! referenced by long-lived state never collides with its replacement.
//! References to renamed siblings are re-linked to their new identities.

use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::module::image::{self, ModuleImage};
use crate::module::traits::ModuleError;

/// Output of [`ModuleRewriter::rewrite`]
#[derive(Debug, Clone)]
pub struct RewrittenModule {
    /// Identity name before rewriting
    pub logical_name: String,
    /// Freshly assigned identity name
    pub identity: String,
    /// Encoded rewritten image
    pub bytes: Vec<u8>,
    pub image: ModuleImage,
}

/// Assigns identities and re-links references
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleRewriter;

impl ModuleRewriter {
    pub fn new() -> Self {
        Self
    }

    /// Fresh identity for `logical_name`
    pub fn unique_identity(logical_name: &str) -> String {
        format!("{}_{}", logical_name, Uuid::new_v4().simple())
    }

    /// Rewrite raw (possibly sealed) image bytes
    ///
    /// `renames` maps a sibling's logical name to its current identity.
    pub fn rewrite(
        &self,
        raw: &[u8],
        renames: &HashMap<String, String>,
    ) -> Result<RewrittenModule, ModuleError> {
        let mut image = if image::is_sealed(raw) {
            ModuleImage::parse(&image::unseal(raw)?)?
        } else {
            ModuleImage::parse(raw)?
        };

        let logical_name = image.identity.name.clone();
        let identity = Self::unique_identity(&logical_name);
        image.identity.name = identity.clone();

        for reference in &mut image.references {
            if let Some(renamed) = renames.get(&reference.name) {
                debug!(
                    "{}: re-linking {} -> {}",
                    logical_name, reference.name, renamed
                );
                reference.name = renamed.clone();
            }
        }

        let bytes = image.to_bytes()?;
        Ok(RewrittenModule {
            logical_name,
            identity,
            bytes,
            image,
        })
    }
}
