//! Sandboxed pre-load validation
//!
//! Candidate images are inspected in a separate process with resource limits
//! and a deadline, so a malformed or hostile image cannot destabilize the host.

pub mod process;
pub mod validator;

pub use process::ResourceLimits;
pub use validator::{InProcessValidator, ModuleValidator, SandboxValidator};
