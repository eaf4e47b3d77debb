//! Program step - run a task-specific verification program
//!
//! The program sees the sandbox as its working directory and decides the
//! verdict through its exit code and the common output markers. What it
//! actually does (diffing output, probing an interface, fuzzing) is opaque
//! to the pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::classify::{Classifier, Framework};
use crate::config::{ConfigError, GraderConfig};
use crate::environment::CheckerEnvironment;
use crate::logs;
use crate::runner::{ExecRequest, Runner};

use super::{Check, CheckResult, StepMeta};

/// Settings of a program checker
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramConfig {
    /// Command that runs the verification program
    pub command: Vec<String>,
    /// Append sandbox dir, user id, student number and solution id
    #[serde(default = "default_true")]
    pub context_args: bool,
    /// Extra environment for the command
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Description shown above the output
    #[serde(default)]
    pub test_description: String,
    /// Output family the verdict markers follow
    #[serde(default = "default_framework")]
    pub framework: Framework,
}

fn default_true() -> bool {
    true
}

fn default_framework() -> Framework {
    Framework::Generic
}

#[derive(Debug)]
pub struct ProgramStep {
    meta: StepMeta,
    command: Vec<String>,
    context_args: bool,
    extra_env: Vec<(String, String)>,
    test_description: String,
    classifier: Classifier,
    base_env: Vec<(String, String)>,
    script_dir: Option<PathBuf>,
    timeout: Duration,
    output_limit: usize,
    log_limit: usize,
}

impl ProgramStep {
    pub fn new(
        meta: StepMeta,
        config: &ProgramConfig,
        grader: &GraderConfig,
    ) -> Result<Self, ConfigError> {
        if config.command.is_empty() {
            return Err(ConfigError::InvalidChecker {
                checker: meta.name.clone(),
                reason: "program checkers need a non-empty command".to_string(),
            });
        }
        let mut extra_env: Vec<(String, String)> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        extra_env.sort();

        Ok(Self {
            meta,
            command: config.command.clone(),
            context_args: config.context_args,
            extra_env,
            test_description: config.test_description.clone(),
            classifier: Classifier::new(config.framework),
            base_env: grader.sandbox.base_env(),
            script_dir: grader.sandbox.script_dir.clone(),
            timeout: grader.limits.check_timeout(),
            output_limit: grader.limits.output_limit_bytes(),
            log_limit: grader.limits.log_limit_chars(),
        })
    }

    fn argv(&self, env: &CheckerEnvironment) -> Vec<String> {
        let mut argv = self.command.clone();
        if self.context_args {
            argv.push(env.tmpdir().to_string_lossy().into_owned());
            argv.push(env.user().id.to_string());
            argv.push(env.user().student_number.clone());
            argv.push(env.solution_id().to_string());
        }
        argv
    }

    fn exec_env(&self) -> Vec<(String, String)> {
        let mut env = self.base_env.clone();
        env.extend(self.extra_env.iter().cloned());
        env
    }

    fn header(&self) -> String {
        if self.test_description.is_empty() {
            String::new()
        } else {
            format!("<pre>{}\n\n</pre>", logs::escape(&self.test_description))
        }
    }
}

#[async_trait]
impl Check for ProgramStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    async fn run(
        &self,
        env: &mut CheckerEnvironment,
        runner: &dyn Runner,
    ) -> Result<CheckResult> {
        let req = ExecRequest::new(self.argv(env), env.tmpdir())
            .with_env(self.exec_env())
            .with_timeout(self.timeout)
            .with_output_limit(self.output_limit)
            .with_file_size_limit(self.output_limit as u64)
            .with_extra_read_dirs(self.script_dir.iter().cloned());
        let outcome = runner.execute(&req).await;

        let output_ok = self.classifier.output_ok(&outcome.output);
        let (raw, log_truncated) = logs::truncated_log(&outcome.output, self.log_limit);
        let truncated = log_truncated || outcome.truncated;
        let cleaned = self.classifier.clean(&logs::escape(&raw));
        let marked = self.classifier.markup(&cleaned);

        let mut result = CheckResult::new(&self.meta);
        result.set_log(
            format!("{}{}", self.header(), logs::pre_block(&marked)),
            outcome.timed_out,
            truncated,
            outcome.oom,
        );
        result.set_passed(outcome.exit_code == 0 && output_ok);
        Ok(result)
    }
}
