//! Pipeline - ordered checker execution over one submission
//!
//! The pipeline owns the run loop and nothing else: ordering and
//! acceptance come from the policy module, verdicts from the checkers.
//! One faulting checker is folded into a failing result so the rest of
//! the report survives.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::checker::{Check, CheckResult};
use crate::environment::CheckerEnvironment;
use crate::policy;
use crate::runner::Runner;

/// What triggered an evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// A student handed in; only `always` checkers run
    #[default]
    Submission,
    /// A complete evaluation, including checkers held back for grading
    Full,
}

/// Everything one evaluation produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub results: Vec<CheckResult>,
    /// Acceptance verdict over the required results
    pub passed: bool,
}

pub struct Pipeline {
    accept_all_solutions: bool,
}

impl Pipeline {
    pub fn new(accept_all_solutions: bool) -> Self {
        Self {
            accept_all_solutions,
        }
    }

    /// Run all applicable checkers against one environment, in order.
    ///
    /// A failing critical checker stops the run; the remaining applicable
    /// checkers are reported as `not_run` without being invoked.
    pub async fn evaluate(
        &self,
        checks: &[Box<dyn Check>],
        env: &mut CheckerEnvironment,
        runner: &dyn Runner,
        trigger: RunTrigger,
    ) -> PipelineOutcome {
        let mut ordered: Vec<&dyn Check> = checks.iter().map(AsRef::as_ref).collect();
        policy::execution_order(&mut ordered);

        let mut results = Vec::new();
        let mut halted = false;
        for check in ordered {
            let meta = check.meta();
            if !meta.always && trigger != RunTrigger::Full {
                debug!("Skipping {:?}, only runs in full evaluations", meta.name);
                continue;
            }
            if halted {
                results.push(CheckResult::not_run(meta));
                continue;
            }

            let started = Instant::now();
            let mut result = match check.run(env, runner).await {
                Ok(result) => result,
                Err(err) => {
                    error!("Checker {:?} faulted: {:#}", meta.name, err);
                    CheckResult::internal_error(meta)
                }
            };
            result.runtime_ms = started.elapsed().as_millis() as u64;
            debug!(
                "Checker {:?} finished as {} in {} ms",
                meta.name, result.state, result.runtime_ms
            );

            if meta.critical && !result.passed {
                debug!("Critical checker {:?} failed, halting the run", meta.name);
                halted = true;
            }
            results.push(result);
        }

        let passed = policy::accepted(&results, self.accept_all_solutions);
        PipelineOutcome { results, passed }
    }
}
