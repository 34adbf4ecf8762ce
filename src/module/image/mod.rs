//! Module image format
//!
//! On-disk `.amod` images and the sealed wrapper some distributions use.

pub mod format;
pub mod seal;

pub use format::{
    is_module_file, ContractKind, ImageError, ImageHeader, ModuleIdentity, ModuleImage,
    ModuleReference, TypeEntry, IMAGE_FORMAT_VERSION, IMAGE_MAGIC, MODULE_EXTENSION,
};
pub use seal::{is_sealed, seal, unseal, SEAL_KEY_LEN, SEAL_MAGIC};
