//! Compile step - a standalone build as a checker

use anyhow::Result;
use async_trait::async_trait;

use crate::builder::{Builder, BuilderConfig};
use crate::config::{ConfigError, GraderConfig};
use crate::environment::CheckerEnvironment;
use crate::runner::Runner;

use super::{Check, CheckResult, StepMeta};

/// Runs a compiler over the submitted sources and fails on diagnostics,
/// missing required files or a missing artifact.
#[derive(Debug)]
pub struct CompileStep {
    meta: StepMeta,
    builder: Builder,
}

impl CompileStep {
    pub fn new(
        meta: StepMeta,
        config: &BuilderConfig,
        grader: &GraderConfig,
    ) -> Result<Self, ConfigError> {
        let builder = Builder::from_config(&meta.name, config, grader)?;
        Ok(Self { meta, builder })
    }
}

#[async_trait]
impl Check for CompileStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    async fn run(
        &self,
        env: &mut CheckerEnvironment,
        runner: &dyn Runner,
    ) -> Result<CheckResult> {
        let build = self.builder.run(env, runner).await;
        let mut result = CheckResult::new(&self.meta);
        result.set_log(build.log, build.timed_out, build.truncated, build.oom);
        if build.passed {
            result.set_passed(true);
        } else {
            result.set_build_failed();
        }
        Ok(result)
    }
}
