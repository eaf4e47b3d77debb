//! Operator configuration for the grading worker
//!
//! Everything tunable lives in one TOML file (`files/grader.toml` ships the
//! defaults) and is carried around as an explicit `GraderConfig` value. The
//! pipeline, builders and checkers receive it at assembly time; nothing
//! reads ambient global state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::classify::Framework;
use crate::runner::SandboxPolicy;

/// Why a configuration could not be loaded or applied
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown language profile '{0}'")]
    UnknownLanguage(String),
    #[error("no test library configured for framework '{0}'")]
    UnknownFramework(String),
    #[error("invalid file pattern '{pattern}' for '{profile}'")]
    InvalidPattern {
        profile: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("checker '{checker}' is misconfigured: {reason}")]
    InvalidChecker { checker: String, reason: String },
}

/// Complete worker configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    pub limits: Limits,
    pub scheduler: SchedulerConfig,
    pub policy: PolicyConfig,
    pub sandbox: SandboxConfig,
    /// Builder profiles, referenced by checkers via their table key
    pub languages: HashMap<String, LanguageProfile>,
    pub frameworks: Frameworks,
}

impl GraderConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The configuration shipped with the worker
    pub fn builtin() -> Result<Self, ConfigError> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/grader.toml"));
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("files/grader.toml"),
            source,
        })
    }

    pub fn language(&self, name: &str) -> Result<&LanguageProfile, ConfigError> {
        self.languages
            .get(name)
            .ok_or_else(|| ConfigError::UnknownLanguage(name.to_string()))
    }
}

/// Timeouts and size caps applied to every check
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Wall-clock limit per executed command, in seconds
    pub check_timeout_secs: u64,
    /// Cap on captured command output, in KiB. Also limits what a
    /// supervised verification run may write to disk.
    pub output_limit_kb: usize,
    /// Cap on the stored result log, in KiB of characters
    pub log_limit_kb: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            check_timeout_secs: 180,
            output_limit_kb: 512,
            log_limit_kb: 512,
        }
    }
}

impl Limits {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn output_limit_bytes(&self) -> usize {
        self.output_limit_kb * 1024
    }

    pub fn log_limit_chars(&self) -> usize {
        self.log_limit_kb * 1024
    }
}

/// Batch execution knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How many submissions may be checked at the same time
    pub parallel_checks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { parallel_checks: 6 }
    }
}

/// Acceptance policy switches
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Accept every solution regardless of required-check results.
    /// Used during exam review phases; results are still computed and
    /// stored as usual.
    pub accept_all_solutions: bool,
}

/// Confinement settings for executed commands
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// External confinement helper prefixed to every command. Without it
    /// commands run directly, restricted to a cleared environment and
    /// resource limits.
    pub wrapper: Option<PathBuf>,
    /// Flag the wrapper takes for each additionally readable directory
    pub wrapper_dir_flag: String,
    /// Environment given to every executed command
    pub env: HashMap<String, String>,
    /// Directory with support scripts (test runner policies etc.),
    /// passed to verification runs as an extra readable directory
    pub script_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        Self {
            wrapper: None,
            wrapper_dir_flag: "--dir".to_string(),
            env,
            script_dir: None,
        }
    }
}

impl SandboxConfig {
    pub fn policy(&self) -> SandboxPolicy {
        match &self.wrapper {
            Some(program) => SandboxPolicy::Wrapper {
                program: program.clone(),
                dir_flag: self.wrapper_dir_flag.clone(),
            },
            None => SandboxPolicy::Restricted,
        }
    }

    /// Base environment for a command, as a sorted list
    pub fn base_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env
    }
}

/// Compiler/linker defaults for one language, referenced by builders
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageProfile {
    /// Compiler or linker binary
    pub binary: PathBuf,
    /// General flags, whitespace separated
    #[serde(default)]
    pub flags: String,
    /// Library flags
    #[serde(default)]
    pub libs: String,
    /// Additional search path flags
    #[serde(default)]
    pub search_path: String,
    /// Output flags; `{artifact}` is replaced by the artifact name
    #[serde(default)]
    pub output_flags: String,
    /// Regular expression selecting the source files to pass along
    pub file_pattern: String,
}

/// Unit-test runner installation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Frameworks {
    /// JVM used to run test classes
    pub java: PathBuf,
    /// JVM wrapper enforcing the test security policy
    pub java_secure: PathBuf,
    /// Per-framework test library (classpath entry or launcher jar)
    pub libs: HashMap<String, String>,
}

impl Default for Frameworks {
    fn default() -> Self {
        Self {
            java: PathBuf::from("/usr/bin/java"),
            java_secure: PathBuf::from("/usr/bin/java"),
            libs: HashMap::new(),
        }
    }
}

impl Frameworks {
    pub fn lib_for(&self, framework: Framework) -> Result<&str, ConfigError> {
        self.libs
            .get(&framework.to_string())
            .map(|s| s.as_str())
            .ok_or_else(|| ConfigError::UnknownFramework(framework.to_string()))
    }
}
