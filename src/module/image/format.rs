//! `.amod` image codec
//!
//! Layout: 4-byte magic `AMOD`, little-endian `u16` format version, then a
//! bincode body of identity, references, types and payload, in that order.
//! The header (identity + references) can be decoded without touching the
//! rest of the body.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::module::traits::ModuleError;

/// Image magic bytes
pub const IMAGE_MAGIC: &[u8; 4] = b"AMOD";

/// Current format version
pub const IMAGE_FORMAT_VERSION: u16 = 1;

/// File extension of module images
pub const MODULE_EXTENSION: &str = "amod";

const PREAMBLE_LEN: usize = IMAGE_MAGIC.len() + 2;

/// Image codec errors
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("bad magic")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("image truncated ({0} bytes)")]
    Truncated(usize),

    #[error("corrupt body: {0}")]
    Corrupt(String),

    #[error("sealed image too short ({0} bytes)")]
    SealTruncated(usize),
}

impl From<bincode::Error> for ImageError {
    fn from(e: bincode::Error) -> Self {
        ImageError::Corrupt(e.to_string())
    }
}

impl From<ImageError> for ModuleError {
    fn from(e: ImageError) -> Self {
        ModuleError::InvalidImage(e.to_string())
    }
}

/// Name and version of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: String,
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Declared external reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleReference {
    pub name: String,
    pub version: String,
}

/// Which capability contract a type implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    #[default]
    None,
    Extension,
    Module,
    PatchHooks,
}

/// Type table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub name: String,
    pub contract: ContractKind,
    /// Explicit hot-reload eligibility
    pub hotloadable: bool,
    /// Shared with other modules
    pub public: bool,
}

/// Identity and references only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub identity: ModuleIdentity,
    pub references: Vec<ModuleReference>,
}

/// Fully decoded module image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleImage {
    pub identity: ModuleIdentity,
    pub references: Vec<ModuleReference>,
    pub types: Vec<TypeEntry>,
    pub payload: Vec<u8>,
}

fn body(bytes: &[u8]) -> Result<&[u8], ImageError> {
    if bytes.len() < PREAMBLE_LEN {
        return Err(ImageError::Truncated(bytes.len()));
    }
    if &bytes[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != IMAGE_FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    Ok(&bytes[PREAMBLE_LEN..])
}

impl ModuleImage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identity: ModuleIdentity {
                name: name.into(),
                version: version.into(),
            },
            references: Vec::new(),
            types: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Add a reference (builder style)
    pub fn with_reference(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.references.push(ModuleReference {
            name: name.into(),
            version: version.into(),
        });
        self
    }

    /// Add a type (builder style)
    pub fn with_type(
        mut self,
        name: impl Into<String>,
        contract: ContractKind,
        hotloadable: bool,
    ) -> Self {
        self.types.push(TypeEntry {
            name: name.into(),
            contract,
            hotloadable,
            public: true,
        });
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Decode a full image
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        Ok(bincode::deserialize(body(bytes)?)?)
    }

    /// Decode identity and references only
    pub fn parse_header(bytes: &[u8]) -> Result<ImageHeader, ImageError> {
        Ok(bincode::deserialize(body(bytes)?)?)
    }

    /// Encode to on-disk bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let encoded = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(PREAMBLE_LEN + encoded.len());
        bytes.extend_from_slice(IMAGE_MAGIC);
        bytes.extend_from_slice(&IMAGE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&encoded);
        Ok(bytes)
    }

    /// Types implementing `contract`
    pub fn exposed_types(&self, contract: ContractKind) -> impl Iterator<Item = &TypeEntry> {
        self.types.iter().filter(move |t| t.contract == contract)
    }

    /// Names of all public types
    pub fn shared_types(&self) -> Vec<String> {
        self.types
            .iter()
            .filter(|t| t.public)
            .map(|t| t.name.clone())
            .collect()
    }
}

/// Whether `path` has the module image extension
pub fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(MODULE_EXTENSION))
}
