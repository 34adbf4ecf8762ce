//! Pre-load reference validation
//!
//! [`SandboxValidator`] inspects candidates in a separate `addon-validate`
//! process with a bounded runtime; [`InProcessValidator`] runs the same
//! check on a blocking thread for embedders and tests that accept the risk.
//! Both inspect the exact bytes the caller is about to load.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::module::sandbox::process::ResourceLimits;
use crate::module::traits::ModuleError;
use crate::module::validation::{inspect_bytes, ValidationPolicy, Verdict};
use crate::utils::with_custom_timeout;

/// Decides whether a candidate image may be loaded
#[async_trait]
pub trait ModuleValidator: Send + Sync {
    /// Inspect `bytes` (read from `path`) against `policy`
    ///
    /// Failures of any kind are rejections.
    async fn inspect_bytes(&self, path: &Path, bytes: &[u8], policy: &ValidationPolicy)
        -> Verdict;

    /// Read `path` once and inspect what was read
    async fn inspect(&self, path: &Path, policy: &ValidationPolicy) -> Verdict {
        match tokio::fs::read(path).await {
            Ok(bytes) => self.inspect_bytes(path, &bytes, policy).await,
            Err(e) => Verdict::reject(format!("cannot read {}: {}", path.display(), e), Vec::new()),
        }
    }

    async fn validate(
        &self,
        path: &Path,
        allow: Option<&[String]>,
        deny: Option<&[String]>,
    ) -> bool {
        let policy = ValidationPolicy {
            deny: deny.map(|d| d.to_vec()).unwrap_or_default(),
            allow: allow.map(|a| a.to_vec()),
        };
        self.inspect(path, &policy).await.accepted
    }
}

/// Validation inside the host process
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessValidator;

#[async_trait]
impl ModuleValidator for InProcessValidator {
    async fn inspect_bytes(
        &self,
        _path: &Path,
        bytes: &[u8],
        policy: &ValidationPolicy,
    ) -> Verdict {
        let compiled = match policy.compile() {
            Ok(c) => c,
            Err(e) => return Verdict::reject(e.to_string(), Vec::new()),
        };
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || inspect_bytes(&bytes, &compiled))
            .await
            .unwrap_or_else(|e| Verdict::reject(format!("inspection task failed: {}", e), Vec::new()))
    }
}

/// Validation in a child process
///
/// The candidate bytes are piped to the child's stdin; `--path` only labels
/// them in the child's logs.
#[derive(Debug, Clone)]
pub struct SandboxValidator {
    program: PathBuf,
    timeout: Duration,
    limits: ResourceLimits,
}

impl SandboxValidator {
    /// Create a validator running `program` with a deadline of `timeout`
    pub fn new<P: AsRef<Path>>(program: P, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            timeout,
            limits: ResourceLimits::default(),
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.validator_program(), config.timeout())
            .with_limits(ResourceLimits::from(&config.resource_limits))
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, path: &Path, policy: &ValidationPolicy) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("--stdin").arg("--path").arg(path);
        // `--flag=value` so patterns starting with '-' are not read as flags
        for pattern in &policy.deny {
            command.arg(format!("--deny={}", pattern));
        }
        if let Some(ref allow) = policy.allow {
            command.arg("--enforce-allow");
            for name in allow {
                command.arg(format!("--allow={}", name));
            }
        }
        command
            .args(self.limits.to_args())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(
        &self,
        path: &Path,
        bytes: &[u8],
        policy: &ValidationPolicy,
    ) -> Result<Verdict, ModuleError> {
        let mut child = self.command(path, policy).spawn().map_err(|e| {
            ModuleError::SandboxError(format!(
                "Failed to spawn validator {}: {}",
                self.program.display(),
                e
            ))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ModuleError::SandboxError("validator stdin unavailable".to_string()))?;

        // Dropping the future on timeout drops the child, which kills it
        let exchange = async move {
            stdin.write_all(bytes).await?;
            // EOF tells the child the image is complete
            drop(stdin);
            child.wait_with_output().await
        };
        let output = with_custom_timeout(exchange, self.timeout)
            .await
            .map_err(|_| ModuleError::Timeout)??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModuleError::SandboxError(format!(
                "validator exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ModuleError::SandboxError("validator printed no verdict".to_string()))?;
        Ok(serde_json::from_str(line)?)
    }
}

#[async_trait]
impl ModuleValidator for SandboxValidator {
    async fn inspect_bytes(&self, path: &Path, bytes: &[u8], policy: &ValidationPolicy) -> Verdict {
        debug!("Sandboxed validation of {} ({} bytes)", path.display(), bytes.len());
        match self.run(path, bytes, policy).await {
            Ok(verdict) => verdict,
            Err(ModuleError::Timeout) => {
                warn!(
                    "Validator timed out after {:?} on {}",
                    self.timeout,
                    path.display()
                );
                Verdict::reject(
                    format!("validator timed out after {}ms", self.timeout.as_millis()),
                    Vec::new(),
                )
            }
            Err(e) => {
                warn!("Validator failed on {}: {}", path.display(), e);
                Verdict::reject(e.to_string(), Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::image::{ContractKind, ModuleImage};

    #[tokio::test]
    async fn test_in_process_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.amod");
        let bytes = ModuleImage::new("A", "1.0")
            .with_reference("Risky.Net", "1.0")
            .with_type("A.Entry", ContractKind::Module, false)
            .to_bytes()
            .unwrap();
        std::fs::write(&path, bytes).unwrap();

        let validator = InProcessValidator;
        let deny = vec!["^Risky".to_string()];
        assert!(!validator.validate(&path, None, Some(deny.as_slice())).await);
        assert!(validator.validate(&path, None, None).await);

        let allow = vec!["Other".to_string()];
        assert!(!validator.validate(&path, Some(allow.as_slice()), None).await);
    }

    #[tokio::test]
    async fn test_missing_program_rejects() {
        let validator = SandboxValidator::new(
            "/nonexistent/addon-validate",
            Duration::from_millis(500),
        );
        let verdict = validator
            .inspect_bytes(Path::new("whatever.amod"), b"AMOD", &ValidationPolicy::default())
            .await;
        assert!(!verdict.accepted);
        assert!(verdict.reason.unwrap().contains("Failed to spawn validator"));
    }

    #[test]
    fn test_command_carries_policy() {
        let validator = SandboxValidator::new("addon-validate", Duration::from_secs(1));
        let policy = ValidationPolicy {
            deny: vec!["x".to_string(), "-internal$".to_string()],
            allow: Some(vec!["Core".to_string()]),
        };
        let command = validator.command(Path::new("m.amod"), &policy);
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--stdin",
                "--path",
                "m.amod",
                "--deny=x",
                "--deny=-internal$",
                "--enforce-allow",
                "--allow=Core",
            ]
        );
    }
}
