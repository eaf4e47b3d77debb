//! Grader worker - evaluates a batch of submissions described by a job file
//!
//! The worker reads one JSON job file (checker list, submissions, trigger),
//! evaluates every submission through the pipeline and prints the reports
//! as JSON on stdout. Queueing and persistence live with the caller.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{error, info};

use grader::checker::{self, StepConfig};
use grader::config::GraderConfig;
use grader::pipeline::RunTrigger;
use grader::runner::{Runner, SafeRunner};
use grader::scheduler::{QueuedSubmission, Scheduler};

/// Job file format: which checkers to run over which submissions
#[derive(Debug, Deserialize)]
struct CheckJob {
    checkers: Vec<StepConfig>,
    submissions: Vec<QueuedSubmission>,
    #[serde(default)]
    trigger: RunTrigger,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = match std::env::var("GRADER_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            GraderConfig::load(&path)?
        }
        Err(_) => GraderConfig::builtin()?,
    };

    let job_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: grader <job.json>")?;
    let job_data = std::fs::read_to_string(&job_path)
        .with_context(|| format!("Failed to read job file {:?}", job_path))?;
    let job: CheckJob = serde_json::from_str(&job_data)
        .with_context(|| format!("Malformed job file {:?}", job_path))?;

    info!(
        "Evaluating {} submission(s) with {} checker(s)",
        job.submissions.len(),
        job.checkers.len()
    );

    let checks = Arc::new(checker::from_specs(&job.checkers, &config));
    let runner: Arc<dyn Runner> = Arc::new(SafeRunner::new(config.sandbox.policy()));
    let scheduler = Scheduler::new(&config);

    let outcomes = scheduler
        .check_batch(checks, job.submissions, runner, job.trigger)
        .await;

    let mut failed = 0usize;
    let mut reports = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(report) => {
                info!(
                    "Solution {} finished: passed={}",
                    report.solution_id, report.passed
                );
                reports.push(report);
            }
            Err(err) => {
                error!("Evaluation failed: {:#}", err);
                failed += 1;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    if failed > 0 {
        bail!("{} evaluation(s) did not complete", failed);
    }
    Ok(())
}
