//! Module registry and discovery
//!
//! Handles directory scans, manifest parsing, load ordering and reference resolution.

pub mod dependencies;
pub mod discovery;
pub mod manifest;
pub mod resolver;

pub use dependencies::{DependencyResolution, ModuleDependencies};
pub use discovery::{header_of, read_header, DiscoveredModule, ModuleDiscovery};
pub use manifest::{ManifestType, ModuleManifest};
pub use resolver::{Linkage, ReferenceResolver, ResolvedDefinition};
