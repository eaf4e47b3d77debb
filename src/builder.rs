//! Builder - compile and link steps over submitted sources
//!
//! A builder matches submitted files against a pattern, assembles one
//! compiler or linker command and judges nothing but the build itself:
//! non-zero exit or a missing expected artifact fails the build, semantics
//! stay with the checkers.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::config::{ConfigError, GraderConfig};
use crate::environment::CheckerEnvironment;
use crate::logs;
use crate::runner::{ExecRequest, Runner};

/// Per-checker build settings, overriding a language profile
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Language profile this builder starts from
    pub language: String,
    /// Compiler or linker flags, whitespace separated
    pub flags: Option<String>,
    /// Library flags
    pub libs: Option<String>,
    /// Additional search path flags
    pub search_path: Option<String>,
    /// Output flags; `{artifact}` is replaced by the artifact name
    pub output_flags: Option<String>,
    /// Regular expression selecting the files to pass along
    pub file_pattern: Option<String>,
    /// Space-separated file names excluded from matching
    pub ignore: String,
    /// File names that must be present among the sources
    pub required_files: Vec<String>,
    /// Artifact that must exist after a successful run
    pub artifact: Option<String>,
}

/// Outcome of one build
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub passed: bool,
    /// HTML-safe build log
    pub log: String,
    pub timed_out: bool,
    pub oom: bool,
    pub truncated: bool,
}

impl BuildResult {
    /// A build rejected before any process ran
    fn fail_fast(message: impl AsRef<str>) -> Self {
        Self {
            passed: false,
            log: logs::pre_block(&logs::escape(message.as_ref())),
            timed_out: false,
            oom: false,
            truncated: false,
        }
    }
}

/// A ready-to-run compiler or linker invocation
#[derive(Debug)]
pub struct Builder {
    binary: PathBuf,
    search_path: Vec<String>,
    flags: Vec<String>,
    libs: Vec<String>,
    output_flags: Vec<String>,
    file_pattern: Regex,
    ignore: Vec<String>,
    required_files: Vec<String>,
    artifact: Option<String>,
    base_env: Vec<(String, String)>,
    timeout: Duration,
    output_limit: usize,
    log_limit: usize,
}

impl Builder {
    /// Resolve a builder configuration against the worker configuration.
    /// `name` is the owning checker, used in error messages.
    pub fn from_config(
        name: &str,
        config: &BuilderConfig,
        grader: &GraderConfig,
    ) -> Result<Self, ConfigError> {
        let profile = grader.language(&config.language)?;

        let pattern = config
            .file_pattern
            .as_deref()
            .unwrap_or(&profile.file_pattern);
        let file_pattern = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            profile: config.language.clone(),
            pattern: pattern.to_string(),
            source,
        })?;

        let output_template = config
            .output_flags
            .as_deref()
            .unwrap_or(&profile.output_flags);
        let output_flags = match &config.artifact {
            Some(artifact) => split_flags(&output_template.replace("{artifact}", artifact)),
            None if output_template.contains("{artifact}") => {
                return Err(ConfigError::InvalidChecker {
                    checker: name.to_string(),
                    reason: "output flags expect an artifact name but none is configured"
                        .to_string(),
                })
            }
            None => split_flags(output_template),
        };

        Ok(Self {
            binary: profile.binary.clone(),
            search_path: split_flags(config.search_path.as_deref().unwrap_or(&profile.search_path)),
            flags: split_flags(config.flags.as_deref().unwrap_or(&profile.flags)),
            libs: split_flags(config.libs.as_deref().unwrap_or(&profile.libs)),
            output_flags,
            file_pattern,
            ignore: config.ignore.split_whitespace().map(String::from).collect(),
            required_files: config.required_files.clone(),
            artifact: config.artifact.clone(),
            base_env: grader.sandbox.base_env(),
            timeout: grader.limits.check_timeout(),
            output_limit: grader.limits.output_limit_bytes(),
            log_limit: grader.limits.log_limit_chars(),
        })
    }

    /// Source files this builder would pass to the compiler
    pub fn matched_files(&self, env: &CheckerEnvironment) -> Vec<String> {
        env.sources()
            .iter()
            .map(|source| source.name.clone())
            .filter(|name| self.file_pattern.is_match(name) && !self.ignore.contains(name))
            .collect()
    }

    /// Assemble the full command for the given file names
    fn command(&self, file_names: &[String]) -> Vec<String> {
        let mut cmd = vec![self.binary.to_string_lossy().into_owned()];
        cmd.extend(self.search_path.iter().cloned());
        cmd.extend(self.flags.iter().cloned());
        cmd.extend(self.libs.iter().cloned());
        cmd.extend(self.output_flags.iter().cloned());
        cmd.extend(file_names.iter().cloned());
        cmd
    }

    /// Run the build inside the sandbox.
    ///
    /// An empty file set or missing required file fails without invoking
    /// any process.
    pub async fn run(&self, env: &CheckerEnvironment, runner: &dyn Runner) -> BuildResult {
        for required in &self.required_files {
            if !env.sources().iter().any(|s| &s.name == required) {
                debug!("Build fails fast, required file {:?} missing", required);
                return BuildResult::fail_fast(format!("Required file '{}' is missing.", required));
            }
        }

        let files = self.matched_files(env);
        if files.is_empty() {
            debug!("Build fails fast, no sources match {:?}", self.file_pattern.as_str());
            return BuildResult::fail_fast(
                "No files to build: nothing matches the expected file pattern.",
            );
        }

        let req = ExecRequest::new(self.command(&files), env.tmpdir())
            .with_env(self.base_env.clone())
            .with_timeout(self.timeout)
            .with_output_limit(self.output_limit);
        let outcome = runner.execute(&req).await;

        let (raw, log_truncated) = logs::truncated_log(&outcome.output, self.log_limit);
        let truncated = log_truncated || outcome.truncated;
        let mut passed = outcome.is_success() && !truncated;
        let mut log = logs::pre_block(&logs::escape(&raw));

        if passed {
            if let Some(artifact) = &self.artifact {
                if !env.tmpdir().join(artifact).exists() {
                    passed = false;
                    log.push_str(&logs::pre_block(&logs::escape(&format!(
                        "Expected build artifact '{}' was not created.",
                        artifact
                    ))));
                }
            }
        }

        BuildResult {
            passed,
            log,
            timed_out: outcome.timed_out,
            oom: outcome.oom,
            truncated,
        }
    }
}

fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(String::from).collect()
}
