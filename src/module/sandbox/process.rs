//! Process-level resource limits for the validator child
//!
//! The child applies these to itself before reading the candidate image,
//! so a hostile image cannot exhaust host memory or descriptors.

#[cfg(all(unix, feature = "nix"))]
use nix::sys::resource::{setrlimit, Resource};

use tracing::debug;

use crate::config::ResourceLimitsConfig;
use crate::module::traits::ModuleError;

/// Resource limits for the validator process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum address space (bytes)
    pub max_memory_bytes: Option<u64>,
    /// Maximum number of file descriptors
    pub max_file_descriptors: Option<u64>,
    /// Maximum CPU time (seconds)
    pub max_cpu_seconds: Option<u64>,
}

impl From<&ResourceLimitsConfig> for ResourceLimits {
    fn from(config: &ResourceLimitsConfig) -> Self {
        Self {
            max_memory_bytes: config.max_memory_bytes,
            max_file_descriptors: config.max_file_descriptors,
            max_cpu_seconds: config.max_cpu_seconds,
        }
    }
}

impl ResourceLimits {
    /// Command-line form understood by the validator binary
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(v) = self.max_memory_bytes {
            args.push("--max-memory-bytes".to_string());
            args.push(v.to_string());
        }
        if let Some(v) = self.max_file_descriptors {
            args.push("--max-file-descriptors".to_string());
            args.push(v.to_string());
        }
        if let Some(v) = self.max_cpu_seconds {
            args.push("--max-cpu-seconds".to_string());
            args.push(v.to_string());
        }
        args
    }

    /// Apply the limits to the calling process
    ///
    /// On Unix with the `nix` feature, uses `setrlimit`. Elsewhere this only logs.
    pub fn apply_to_current_process(&self) -> Result<(), ModuleError> {
        #[cfg(all(unix, feature = "nix"))]
        {
            // Apply memory limit (RLIMIT_AS = address space limit)
            if let Some(max_memory) = self.max_memory_bytes {
                setrlimit(Resource::RLIMIT_AS, max_memory, max_memory).map_err(|e| {
                    ModuleError::SandboxError(format!("Failed to set memory limit: {}", e))
                })?;
                debug!("Set memory limit: {} bytes", max_memory);
            }

            if let Some(max_fds) = self.max_file_descriptors {
                setrlimit(Resource::RLIMIT_NOFILE, max_fds, max_fds).map_err(|e| {
                    ModuleError::SandboxError(format!(
                        "Failed to set file descriptor limit: {}",
                        e
                    ))
                })?;
                debug!("Set file descriptor limit: {}", max_fds);
            }

            // RLIMIT_CPU is CPU time, not a percentage
            if let Some(cpu) = self.max_cpu_seconds {
                setrlimit(Resource::RLIMIT_CPU, cpu, cpu).map_err(|e| {
                    ModuleError::SandboxError(format!("Failed to set CPU limit: {}", e))
                })?;
                debug!("Set CPU limit: {}s", cpu);
            }
        }

        #[cfg(not(all(unix, feature = "nix")))]
        {
            debug!("Resource limits not enforced on this platform: {:?}", self);
        }

        Ok(())
    }
}
