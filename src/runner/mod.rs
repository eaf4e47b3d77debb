//! Runner module - Process execution abstraction
//!
//! This module provides the single gateway through which builders and
//! checkers run external tool chains:
//! - `SafeRunner`: restricted execution with a cleared environment,
//!   resource limits and whole-group teardown on timeout
//!
//! The runner module does NOT:
//! - Decide pass/fail (that is classification on the returned output)
//! - Truncate logs for display (it caps retained bytes and reports when
//!   the cap struck; formatting is the log pipeline's job)
//! - Know which checker or builder is calling it

pub mod safe;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fallback wall-clock limit when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
/// Fallback cap on retained combined output, in bytes.
pub const DEFAULT_OUTPUT_LIMIT: usize = 512 * 1024;

/// A command to run inside a sandbox directory
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Argument vector, first element is the program
    pub argv: Vec<String>,
    /// Working directory of the child
    pub working_dir: PathBuf,
    /// Environment of the child; nothing else is inherited
    pub env: Vec<(String, String)>,
    /// Wall-clock limit
    pub timeout: Duration,
    /// Cap on retained combined stdout+stderr, in bytes
    pub output_limit: usize,
    /// Cap on files the process may write, enforced via rlimit.
    /// Verification runs set this; builds stay uncapped so large
    /// artifacts can be written.
    pub file_size_limit: Option<u64>,
    /// Directories outside the sandbox the command may read
    pub extra_read_dirs: Vec<PathBuf>,
}

impl ExecRequest {
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            argv: argv.into_iter().map(|a| a.into()).collect(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            file_size_limit: None,
            extra_read_dirs: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    pub fn with_file_size_limit(mut self, limit: u64) -> Self {
        self.file_size_limit = Some(limit);
        self
    }

    pub fn with_extra_read_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.extra_read_dirs = dirs.into_iter().map(|d| d.into()).collect();
        self
    }
}

/// What happened when a command ran
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Combined stdout+stderr, capped at the requested limit
    pub output: String,
    /// Exit code; `128 + signal` for a killed process, never 0 then
    pub exit_code: i32,
    /// Wall-clock limit was hit and the process group was killed
    pub timed_out: bool,
    /// Killed by SIGKILL without the runner's timeout firing
    pub oom: bool,
    /// Bytes past the retention cap were dropped; `output` is incomplete
    pub truncated: bool,
    /// Wall time of the run in milliseconds
    pub time_ms: u64,
}

impl ProcessOutcome {
    /// A run that never started (missing binary, empty command, spawn
    /// refusal). Reported as a failed run, not as a pipeline fault.
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            exit_code: 127,
            timed_out: false,
            oom: false,
            truncated: false,
            time_ms: 0,
        }
    }

    /// Check if the run completed normally with exit code 0
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.oom
    }
}

/// Runner trait for executing commands
///
/// Infallible by contract: everything that can go wrong while launching or
/// supervising a command is folded into the outcome, so a broken command
/// fails one check instead of aborting the pipeline.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command to completion or until its limits strike
    async fn execute(&self, req: &ExecRequest) -> ProcessOutcome;
}

// Re-exports
pub use safe::{SafeRunner, SandboxPolicy};
