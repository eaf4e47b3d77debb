//! Checker module - the step variants a task pipeline is assembled from
//!
//! A checker is one step in the ordered evaluation of a submission:
//! - `CompileStep`: a standalone build
//! - `UnitTestStep`: build the sources together with a test class, then
//!   run it under a unit-test framework
//! - `ProgramStep`: run a custom verification program
//! - `CreateFileStep`: stage a prepared file into the sandbox
//!
//! All variants implement the `Check` trait and report a `CheckResult`;
//! scheduling, ordering and acceptance live in the pipeline, not here.

pub mod compile;
pub mod create_file;
pub mod program;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::builder::BuilderConfig;
use crate::config::{ConfigError, GraderConfig};
use crate::environment::CheckerEnvironment;
use crate::logs;
use crate::runner::Runner;

pub use compile::CompileStep;
pub use create_file::{CreateFileConfig, CreateFileStep};
pub use program::{ProgramConfig, ProgramStep};
pub use unit_test::{UnitTestConfig, UnitTestStep, RESULT_HEADER};

/// Settings every checker carries, independent of its kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMeta {
    /// Position in the pipeline; gaps between indices are fine
    #[serde(default)]
    pub order: i32,
    /// Title shown on the results page
    pub name: String,
    /// Result is displayed to the submitter
    #[serde(default = "default_true")]
    pub public: bool,
    /// Must pass for the solution to be accepted
    #[serde(default)]
    pub required: bool,
    /// Runs at submission time, not only in a full run
    #[serde(default = "default_true")]
    pub always: bool,
    /// On failure, nothing after this checker runs
    #[serde(default)]
    pub critical: bool,
}

fn default_true() -> bool {
    true
}

/// Terminal state of a finished check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Passed,
    FailedBuild,
    FailedVerification,
    TimedOut,
    OutOfMemory,
    Truncated,
    NotRun,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckState::Passed => "passed",
            CheckState::FailedBuild => "failed_build",
            CheckState::FailedVerification => "failed_verification",
            CheckState::TimedOut => "timed_out",
            CheckState::OutOfMemory => "out_of_memory",
            CheckState::Truncated => "truncated",
            CheckState::NotRun => "not_run",
        };
        write!(f, "{}", s)
    }
}

/// Result of one checker on one submission
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub order: i32,
    pub public: bool,
    pub required: bool,
    pub state: CheckState,
    pub passed: bool,
    /// HTML-safe log shown on the results page
    pub log: String,
    pub timed_out: bool,
    pub oom: bool,
    pub truncated: bool,
    /// Wall time of the whole step in milliseconds
    pub runtime_ms: u64,
    #[serde(skip)]
    build_failed: bool,
}

impl CheckResult {
    pub fn new(meta: &StepMeta) -> Self {
        Self {
            name: meta.name.clone(),
            order: meta.order,
            public: meta.public,
            required: meta.required,
            state: CheckState::NotRun,
            passed: false,
            log: String::new(),
            timed_out: false,
            oom: false,
            truncated: false,
            runtime_ms: 0,
            build_failed: false,
        }
    }

    /// Result for a checker skipped after a critical failure
    pub fn not_run(meta: &StepMeta) -> Self {
        let mut result = Self::new(meta);
        result.log = "Not run: a previous critical check failed.".to_string();
        result
    }

    /// Failing result standing in for a checker that crashed internally.
    /// The log stays generic; details belong into the worker log.
    pub fn internal_error(meta: &StepMeta) -> Self {
        let mut result = Self::new(meta);
        result.log = "An internal error occurred while running this check.".to_string();
        result.state = CheckState::FailedVerification;
        result
    }

    /// Store the log, prepending notices for abnormal conditions
    pub fn set_log(&mut self, log: impl Into<String>, timed_out: bool, truncated: bool, oom: bool) {
        let mut log = log.into();
        if truncated {
            log = format!("{}{}", logs::TRUNCATION_NOTICE, log);
        }
        if oom {
            log = format!("{}{}", logs::OOM_NOTICE, log);
        }
        if timed_out {
            log = format!("{}{}", logs::TIMEOUT_NOTICE, log);
        }
        self.timed_out = timed_out;
        self.truncated = truncated;
        self.oom = oom;
        self.log = log;
        self.state = self.derive_state();
    }

    /// Record the verdict. A timed out, out-of-memory or truncated check
    /// can never count as passed, whatever the caller concluded.
    pub fn set_passed(&mut self, passed: bool) {
        self.passed = passed && !self.timed_out && !self.oom && !self.truncated;
        self.state = self.derive_state();
    }

    /// Mark this result as failed because its build did not pass
    pub fn set_build_failed(&mut self) {
        self.build_failed = true;
        self.passed = false;
        self.state = self.derive_state();
    }

    fn derive_state(&self) -> CheckState {
        if self.passed {
            CheckState::Passed
        } else if self.timed_out {
            CheckState::TimedOut
        } else if self.oom {
            CheckState::OutOfMemory
        } else if self.truncated {
            CheckState::Truncated
        } else if self.build_failed {
            CheckState::FailedBuild
        } else {
            CheckState::FailedVerification
        }
    }
}

/// One checker, ready to run against an environment
#[async_trait]
pub trait Check: Send + Sync {
    fn meta(&self) -> &StepMeta;

    /// Evaluate this checker inside the given sandbox.
    ///
    /// Expected failures (tool diagnostics, non-zero exits, timeouts) are
    /// part of the `CheckResult`; `Err` means the checker itself broke.
    async fn run(&self, env: &mut CheckerEnvironment, runner: &dyn Runner)
        -> Result<CheckResult>;
}

/// Checker configuration as it arrives in a job description
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    #[serde(flatten)]
    pub meta: StepMeta,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The closed set of checker kinds
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Compile(BuilderConfig),
    UnitTest(UnitTestConfig),
    Program(ProgramConfig),
    CreateFile(CreateFileConfig),
}

/// Stand-in for a checker whose configuration did not resolve.
///
/// Runs like any other step and always fails, carrying the configuration
/// error into the result log where the task author can see it.
struct MisconfiguredStep {
    meta: StepMeta,
    error: String,
}

#[async_trait]
impl Check for MisconfiguredStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    async fn run(
        &self,
        _env: &mut CheckerEnvironment,
        _runner: &dyn Runner,
    ) -> Result<CheckResult> {
        let mut result = CheckResult::new(&self.meta);
        result.set_log(
            logs::pre_block(&logs::escape(&format!(
                "Invalid checker configuration: {}",
                self.error
            ))),
            false,
            false,
            false,
        );
        result.set_passed(false);
        Ok(result)
    }
}

/// Instantiate all configured checkers against the worker configuration.
///
/// A checker whose configuration does not resolve is replaced by a step
/// that always fails with the error text, so one broken entry cannot take
/// the evaluation of the healthy ones down with it.
pub fn from_specs(specs: &[StepConfig], grader: &GraderConfig) -> Vec<Box<dyn Check>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn Check> {
            match resolve_spec(spec, grader) {
                Ok(check) => check,
                Err(err) => {
                    warn!("Checker {:?} is misconfigured: {}", spec.meta.name, err);
                    Box::new(MisconfiguredStep {
                        meta: spec.meta.clone(),
                        error: err.to_string(),
                    })
                }
            }
        })
        .collect()
}

fn resolve_spec(spec: &StepConfig, grader: &GraderConfig) -> Result<Box<dyn Check>, ConfigError> {
    match &spec.kind {
        StepKind::Compile(config) => {
            Ok(Box::new(CompileStep::new(spec.meta.clone(), config, grader)?))
        }
        StepKind::UnitTest(config) => {
            Ok(Box::new(UnitTestStep::new(spec.meta.clone(), config, grader)?))
        }
        StepKind::Program(config) => {
            Ok(Box::new(ProgramStep::new(spec.meta.clone(), config, grader)?))
        }
        StepKind::CreateFile(config) => {
            Ok(Box::new(CreateFileStep::new(spec.meta.clone(), config.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> StepMeta {
        StepMeta {
            order: 1,
            name: name.to_string(),
            public: true,
            required: true,
            always: true,
            critical: false,
        }
    }

    #[test]
    fn test_meta_defaults_from_minimal_config() {
        let meta: StepMeta = serde_json::from_str(r#"{"name": "compile"}"#).unwrap();
        assert_eq!(meta.order, 0);
        assert!(meta.public);
        assert!(!meta.required);
        assert!(meta.always);
        assert!(!meta.critical);
    }

    #[test]
    fn test_step_config_tagged_deserialization() {
        let spec: StepConfig = serde_json::from_str(
            r#"{
                "kind": "unit_test",
                "name": "JUnit: queue",
                "order": 2,
                "required": true,
                "framework": "junit5",
                "class_name": "QueueTest",
                "test_description": "Checks the queue invariants."
            }"#,
        )
        .unwrap();
        assert_eq!(spec.meta.name, "JUnit: queue");
        assert_eq!(spec.meta.order, 2);
        assert!(spec.meta.required);
        match spec.kind {
            StepKind::UnitTest(config) => {
                assert_eq!(config.class_name, "QueueTest");
            }
            other => panic!("expected unit_test, got {:?}", other),
        }
    }

    #[test]
    fn test_set_passed_enforces_flag_invariant() {
        let mut result = CheckResult::new(&meta("t"));
        result.set_log("log", true, false, false);
        result.set_passed(true);
        assert!(!result.passed);
        assert_eq!(result.state, CheckState::TimedOut);

        let mut result = CheckResult::new(&meta("t"));
        result.set_log("log", false, true, false);
        result.set_passed(true);
        assert!(!result.passed);
        assert_eq!(result.state, CheckState::Truncated);

        let mut result = CheckResult::new(&meta("t"));
        result.set_log("log", false, false, true);
        result.set_passed(true);
        assert!(!result.passed);
        assert_eq!(result.state, CheckState::OutOfMemory);
    }

    #[test]
    fn test_set_log_prepends_notices() {
        let mut result = CheckResult::new(&meta("t"));
        result.set_log("<pre>output</pre>", true, true, false);
        assert!(result.log.starts_with(logs::TIMEOUT_NOTICE));
        assert!(result.log.contains(logs::TRUNCATION_NOTICE));
        assert!(result.log.ends_with("<pre>output</pre>"));
    }

    #[test]
    fn test_states_have_one_winner() {
        let mut result = CheckResult::new(&meta("t"));
        result.set_log("x", false, false, false);
        result.set_passed(true);
        assert_eq!(result.state, CheckState::Passed);
        assert!(result.passed);

        let mut result = CheckResult::new(&meta("t"));
        result.set_log("x", false, false, false);
        result.set_passed(false);
        assert_eq!(result.state, CheckState::FailedVerification);

        let mut result = CheckResult::new(&meta("t"));
        result.set_log("x", false, false, false);
        result.set_build_failed();
        assert_eq!(result.state, CheckState::FailedBuild);

        // abnormal flags outrank the build marker
        let mut result = CheckResult::new(&meta("t"));
        result.set_log("x", true, false, false);
        result.set_build_failed();
        assert_eq!(result.state, CheckState::TimedOut);
    }

    #[test]
    fn test_not_run_and_internal_error_results() {
        let skipped = CheckResult::not_run(&meta("secret tests"));
        assert_eq!(skipped.state, CheckState::NotRun);
        assert!(!skipped.passed);

        let crashed = CheckResult::internal_error(&meta("unit tests"));
        assert_eq!(crashed.state, CheckState::FailedVerification);
        assert!(!crashed.passed);
        assert!(crashed.log.contains("internal error"));
    }

    #[test]
    fn test_state_display_is_snake_case() {
        assert_eq!(CheckState::FailedBuild.to_string(), "failed_build");
        assert_eq!(CheckState::NotRun.to_string(), "not_run");
        assert_eq!(CheckState::OutOfMemory.to_string(), "out_of_memory");
    }

    #[test]
    fn test_result_serializes_for_the_report() {
        let mut result = CheckResult::new(&meta("compile"));
        result.set_log("<pre></pre>", false, false, false);
        result.set_passed(true);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "passed");
        assert_eq!(json["passed"], true);
        assert_eq!(json["name"], "compile");
        assert!(json.get("build_failed").is_none());
    }

    #[tokio::test]
    async fn test_misconfigured_checker_fails_alone() {
        use crate::environment::{SourceFile, Submission, User};
        use crate::testing::RefusingRunner;

        let grader: GraderConfig = toml::from_str(
            r#"
[languages.c]
binary = "/usr/bin/gcc"
file_pattern = '^[a-zA-Z0-9_]*\.[cC]$'
"#,
        )
        .unwrap();
        let specs: Vec<StepConfig> = serde_json::from_str(
            r#"[
                {
                    "kind": "compile",
                    "name": "compile",
                    "language": "c",
                    "file_pattern": "("
                },
                {
                    "kind": "program",
                    "name": "probe",
                    "command": ["/opt/checkers/probe"]
                }
            ]"#,
        )
        .unwrap();

        // the broken entry becomes a failing step, its sibling survives
        let checks = from_specs(&specs, &grader);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[1].meta().name, "probe");

        let submission = Submission {
            solution_id: 7,
            task_id: 2,
            user: User {
                id: 1,
                student_number: "0000000".to_string(),
            },
        };
        let mut env =
            CheckerEnvironment::new(submission, vec![SourceFile::new("main.c", "")]).unwrap();
        let result = checks[0].run(&mut env, &RefusingRunner).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.state, CheckState::FailedVerification);
        assert!(result.log.contains("Invalid checker configuration"));
        assert!(result.log.contains("invalid file pattern"));
    }
}
