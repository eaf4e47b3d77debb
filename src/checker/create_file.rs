//! Create-file step - stage a task-provided file into the sandbox
//!
//! Used for scaffolding, fixtures and test data a task wants present
//! before later builds and runs. Marked as source code, the file also
//! takes part in file matching of subsequent builders.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::environment::CheckerEnvironment;
use crate::logs;
use crate::runner::Runner;

use super::{Check, CheckResult, StepMeta};

/// Settings of a create-file checker
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFileConfig {
    /// Name of the file inside the sandbox
    pub filename: String,
    /// Optional subfolder the file lands in
    #[serde(default)]
    pub path: String,
    /// Content to write
    pub content: String,
    /// Register the file as a source for later builds
    #[serde(default)]
    pub is_sourcecode: bool,
}

#[derive(Debug)]
pub struct CreateFileStep {
    meta: StepMeta,
    config: CreateFileConfig,
}

impl CreateFileStep {
    pub fn new(meta: StepMeta, config: CreateFileConfig) -> Self {
        Self { meta, config }
    }

    fn target(&self) -> String {
        let folder = self.config.path.trim_matches('/');
        if folder.is_empty() {
            self.config.filename.clone()
        } else {
            format!("{}/{}", folder, self.config.filename)
        }
    }
}

#[async_trait]
impl Check for CreateFileStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    async fn run(
        &self,
        env: &mut CheckerEnvironment,
        _runner: &dyn Runner,
    ) -> Result<CheckResult> {
        let target = self.target();
        debug!("Staging {:?} into the sandbox", target);

        let mut result = CheckResult::new(&self.meta);
        match env.stage_file(&target, &self.config.content, self.config.is_sourcecode) {
            Ok(()) => {
                result.set_log(
                    logs::pre_block(&logs::escape(&format!("Created file '{}'.", target))),
                    false,
                    false,
                    false,
                );
                result.set_passed(true);
            }
            Err(err) => {
                // a bad path or an unwritable sandbox fails this step,
                // it does not crash the pipeline
                warn!("Staging {:?} failed: {:#}", target, err);
                result.set_log(
                    logs::pre_block(&logs::escape(&format!(
                        "Could not create file '{}': {:#}",
                        target, err
                    ))),
                    false,
                    false,
                    false,
                );
                result.set_passed(false);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckState;
    use crate::environment::{SourceFile, Submission, User};
    use crate::testing::RefusingRunner;

    fn environment() -> CheckerEnvironment {
        let submission = Submission {
            solution_id: 1,
            task_id: 1,
            user: User {
                id: 1,
                student_number: "0000000".to_string(),
            },
        };
        CheckerEnvironment::new(
            submission,
            vec![SourceFile::new("Queue.java", "class Queue {}")],
        )
        .unwrap()
    }

    fn meta() -> StepMeta {
        StepMeta {
            order: 1,
            name: "provide fixture".to_string(),
            public: false,
            required: false,
            always: true,
            critical: false,
        }
    }

    #[tokio::test]
    async fn test_stages_the_file_and_passes() {
        let mut env = environment();
        let step = CreateFileStep::new(
            meta(),
            CreateFileConfig {
                filename: "input.txt".to_string(),
                path: "data".to_string(),
                content: "1 2 3".to_string(),
                is_sourcecode: false,
            },
        );

        let result = step.run(&mut env, &RefusingRunner).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.state, CheckState::Passed);
        assert_eq!(
            std::fs::read_to_string(env.tmpdir().join("data/input.txt")).unwrap(),
            "1 2 3"
        );
        // plain staging keeps the source list untouched
        assert_eq!(env.sources().len(), 1);
    }

    #[tokio::test]
    async fn test_source_files_join_later_builds() {
        let mut env = environment();
        let step = CreateFileStep::new(
            meta(),
            CreateFileConfig {
                filename: "QueueTest.java".to_string(),
                path: String::new(),
                content: "class QueueTest {}".to_string(),
                is_sourcecode: true,
            },
        );

        step.run(&mut env, &RefusingRunner).await.unwrap();
        let names: Vec<&str> = env.sources().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Queue.java", "QueueTest.java"]);
    }

    #[tokio::test]
    async fn test_escaping_target_fails_the_step() {
        let mut env = environment();
        let step = CreateFileStep::new(
            meta(),
            CreateFileConfig {
                filename: "evil.txt".to_string(),
                path: "..".to_string(),
                content: "nope".to_string(),
                is_sourcecode: false,
            },
        );

        let result = step.run(&mut env, &RefusingRunner).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.state, CheckState::FailedVerification);
        assert!(result.log.contains("Could not create file"));
        assert!(!env.tmpdir().join("../evil.txt").exists());
    }
}
