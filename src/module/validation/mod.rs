//! Module validation framework
//!
//! Reference policy checks run before any bytes reach the loader; manifest
//! checks run when images are packed.

pub mod manifest_validator;
pub mod policy;

pub use manifest_validator::{ManifestValidator, ValidationResult};
pub use policy::{inspect_bytes, inspect_file, CompiledPolicy, ValidationPolicy, Verdict};
