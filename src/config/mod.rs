//! Configuration management for the addon host
//!
//! Handles configuration loading, validation, and directory layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::with_default;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding capability-restricted extensions
    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: PathBuf,

    /// Directory holding dependency patch modules
    #[serde(default = "default_patch_modules_dir")]
    pub patch_modules_dir: PathBuf,

    /// Directory holding full-capability modules
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    /// Extra directories searched (after the three above) when resolving references
    #[serde(default)]
    pub reference_dirs: Vec<PathBuf>,

    /// Per-directory watcher flags
    #[serde(default)]
    pub watchers: WatcherConfig,

    /// Pre-load validation policy and sandbox settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Which watched directories react to change notifications
///
/// Initial-scan notifications ignore these flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub extension_watchers: bool,

    #[serde(default = "default_true")]
    pub patch_module_watchers: bool,

    #[serde(default = "default_true")]
    pub module_watchers: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            extension_watchers: true,
            patch_module_watchers: true,
            module_watchers: true,
        }
    }
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Regular expressions; a reference matching any of them rejects the module
    #[serde(default)]
    pub deny_patterns: Vec<String>,

    /// Exact reference names; when set, every reference must appear here
    #[serde(default)]
    pub allow_list: Option<Vec<String>>,

    /// Deadline for one sandboxed validation (milliseconds)
    #[serde(default = "default_validation_timeout_millis")]
    pub timeout_millis: u64,

    /// Validator program; defaults to `addon-validate` next to the current executable
    #[serde(default)]
    pub validator_program: Option<PathBuf>,

    /// Limits applied inside the validator child
    #[serde(default)]
    pub resource_limits: ResourceLimitsConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            deny_patterns: Vec::new(),
            allow_list: None,
            timeout_millis: default_validation_timeout_millis(),
            validator_program: None,
            resource_limits: ResourceLimitsConfig::default(),
        }
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    /// Resolve the validator program path
    pub fn validator_program(&self) -> PathBuf {
        if let Some(ref program) = self.validator_program {
            return program.clone();
        }
        let name = format!("addon-validate{}", std::env::consts::EXE_SUFFIX);
        let exe = with_default(
            std::env::current_exe,
            PathBuf::new(),
            "Cannot locate current executable",
        );
        match exe.parent() {
            Some(dir) => dir.join(&name),
            None => PathBuf::from(name),
        }
    }
}

/// Resource limits for the validator child process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimitsConfig {
    /// Address space limit (bytes)
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: Option<u64>,

    /// Open file descriptor limit
    #[serde(default = "default_max_file_descriptors")]
    pub max_file_descriptors: Option<u64>,

    /// CPU time limit (seconds)
    #[serde(default = "default_max_cpu_seconds")]
    pub max_cpu_seconds: Option<u64>,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory_bytes(),
            max_file_descriptors: default_max_file_descriptors(),
            max_cpu_seconds: default_max_cpu_seconds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g., "info", "addon_host::module=debug"); RUST_LOG overrides it
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

fn default_true() -> bool {
    true
}

fn default_extensions_dir() -> PathBuf {
    PathBuf::from("extensions")
}

fn default_patch_modules_dir() -> PathBuf {
    PathBuf::from("patches")
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_validation_timeout_millis() -> u64 {
    crate::utils::DEFAULT_VALIDATION_TIMEOUT.as_millis() as u64
}

fn default_max_memory_bytes() -> Option<u64> {
    Some(256 * 1024 * 1024) // 256 MB
}

fn default_max_file_descriptors() -> Option<u64> {
    Some(64)
}

fn default_max_cpu_seconds() -> Option<u64> {
    Some(10)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extensions_dir: default_extensions_dir(),
            patch_modules_dir: default_patch_modules_dir(),
            modules_dir: default_modules_dir(),
            reference_dirs: Vec::new(),
            watchers: WatcherConfig::default(),
            validation: ValidationConfig::default(),
            logging: None,
        }
    }
}

impl EngineConfig {
    /// Default layout rooted at `root`
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            extensions_dir: root.join(default_extensions_dir()),
            patch_modules_dir: root.join(default_patch_modules_dir()),
            modules_dir: root.join(default_modules_dir()),
            ..Self::default()
        }
    }

    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reference search order: extensions, patch modules, modules, then extra dirs
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.extensions_dir.clone(),
            self.patch_modules_dir.clone(),
            self.modules_dir.clone(),
        ];
        dirs.extend(self.reference_dirs.iter().cloned());
        dirs
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.validation.timeout_millis == 0 {
            return Err(anyhow::anyhow!(
                "validation.timeout_millis must be greater than 0"
            ));
        }

        for pattern in &self.validation.deny_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                anyhow::anyhow!("Invalid deny pattern '{}': {}", pattern, e)
            })?;
        }

        let dirs = [
            &self.extensions_dir,
            &self.patch_modules_dir,
            &self.modules_dir,
        ];
        for (i, a) in dirs.iter().enumerate() {
            if dirs[i + 1..].contains(a) {
                return Err(anyhow::anyhow!(
                    "Addon directories must be distinct: {} is used twice",
                    a.display()
                ));
            }
        }

        Ok(())
    }
}
