//! Scheduler - bounded-parallel evaluation of submission batches
//!
//! Distinct solutions check concurrently up to the configured cap, reruns
//! of the same solution serialize on a per-solution lock. There is no
//! retry logic; a rerun is a fresh evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::info;

use crate::checker::{Check, CheckResult};
use crate::config::GraderConfig;
use crate::environment::{CheckerEnvironment, SourceFile, Submission};
use crate::pipeline::{Pipeline, PipelineOutcome, RunTrigger};
use crate::runner::Runner;

/// One submission plus its files, ready to be evaluated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub submission: Submission,
    pub files: Vec<SourceFile>,
}

/// Final report for one evaluated solution
#[derive(Debug, Clone, Serialize)]
pub struct SolutionReport {
    pub solution_id: i64,
    pub task_id: i64,
    pub passed: bool,
    pub results: Vec<CheckResult>,
}

#[derive(Clone)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
    pipeline: Arc<Pipeline>,
    locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl Scheduler {
    pub fn new(config: &GraderConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.scheduler.parallel_checks)),
            pipeline: Arc::new(Pipeline::new(config.policy.accept_all_solutions)),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn solution_lock(&self, solution_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(solution_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the caller's handle and evict the map entry once nobody else
    /// holds one. The map lock spans the count check, so a concurrent
    /// `solution_lock` cannot revive an entry mid-removal.
    async fn release_solution_lock(&self, solution_id: i64, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(&solution_id) {
            // the map itself accounts for one reference
            if Arc::strong_count(entry) == 1 {
                locks.remove(&solution_id);
            }
        }
    }

    /// Evaluate one solution. Reruns of the same solution wait for each
    /// other before they compete for a parallelism permit, so a waiting
    /// rerun never holds a permit.
    pub async fn check_solution(
        &self,
        checks: &[Box<dyn Check>],
        queued: QueuedSubmission,
        runner: &dyn Runner,
        trigger: RunTrigger,
    ) -> Result<SolutionReport> {
        let solution_id = queued.submission.solution_id;
        let task_id = queued.submission.task_id;
        let lock = self.solution_lock(solution_id).await;
        let outcome = self
            .evaluate_locked(checks, queued, runner, trigger, &lock)
            .await;
        self.release_solution_lock(solution_id, lock).await;
        let outcome = outcome?;

        info!(
            "Solution {} evaluated: passed={}, {} result(s)",
            solution_id,
            outcome.passed,
            outcome.results.len()
        );
        Ok(SolutionReport {
            solution_id,
            task_id,
            passed: outcome.passed,
            results: outcome.results,
        })
    }

    async fn evaluate_locked(
        &self,
        checks: &[Box<dyn Check>],
        queued: QueuedSubmission,
        runner: &dyn Runner,
        trigger: RunTrigger,
        lock: &Mutex<()>,
    ) -> Result<PipelineOutcome> {
        let _rerun_guard = lock.lock().await;
        let _permit = self.permits.acquire().await?;
        let mut env = CheckerEnvironment::new(queued.submission, queued.files)?;
        Ok(self
            .pipeline
            .evaluate(checks, &mut env, runner, trigger)
            .await)
    }

    /// Evaluate a whole batch concurrently under the parallelism cap.
    /// Reports come back in batch order.
    pub async fn check_batch(
        &self,
        checks: Arc<Vec<Box<dyn Check>>>,
        batch: Vec<QueuedSubmission>,
        runner: Arc<dyn Runner>,
        trigger: RunTrigger,
    ) -> Vec<Result<SolutionReport>> {
        let mut handles = Vec::with_capacity(batch.len());
        for queued in batch {
            let scheduler = self.clone();
            let checks = Arc::clone(&checks);
            let runner = Arc::clone(&runner);
            handles.push(tokio::spawn(async move {
                scheduler
                    .check_solution(&checks, queued, runner.as_ref(), trigger)
                    .await
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(err) => reports.push(Err(anyhow!("evaluation task crashed: {}", err))),
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::checker::StepMeta;
    use crate::environment::User;
    use crate::testing::RefusingRunner;

    struct TrackingCheck {
        meta: StepMeta,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl TrackingCheck {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let peak = Arc::new(AtomicUsize::new(0));
            let check = Self {
                meta: StepMeta {
                    order: 1,
                    name: "tracking".to_string(),
                    public: true,
                    required: true,
                    always: true,
                    critical: false,
                },
                current: Arc::new(AtomicUsize::new(0)),
                peak: Arc::clone(&peak),
            };
            (check, peak)
        }
    }

    #[async_trait]
    impl Check for TrackingCheck {
        fn meta(&self) -> &StepMeta {
            &self.meta
        }

        async fn run(
            &self,
            _env: &mut CheckerEnvironment,
            _runner: &dyn Runner,
        ) -> anyhow::Result<CheckResult> {
            let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            let mut result = CheckResult::new(&self.meta);
            result.set_log("<pre></pre>", false, false, false);
            result.set_passed(true);
            Ok(result)
        }
    }

    fn queued(solution_id: i64) -> QueuedSubmission {
        QueuedSubmission {
            submission: Submission {
                solution_id,
                task_id: 9,
                user: User {
                    id: 1,
                    student_number: "0000000".to_string(),
                },
            },
            files: vec![],
        }
    }

    fn config(parallel: usize) -> GraderConfig {
        toml::from_str(&format!("[scheduler]\nparallel_checks = {}", parallel)).unwrap()
    }

    #[tokio::test]
    async fn test_parallelism_stays_under_the_cap() {
        let (check, peak) = TrackingCheck::new();
        let checks: Arc<Vec<Box<dyn Check>>> = Arc::new(vec![Box::new(check)]);
        let scheduler = Scheduler::new(&config(2));
        let batch: Vec<_> = (1..=5).map(queued).collect();

        let reports = scheduler
            .check_batch(checks, batch, Arc::new(RefusingRunner), RunTrigger::Submission)
            .await;
        assert_eq!(reports.len(), 5);
        for report in &reports {
            assert!(report.as_ref().unwrap().passed);
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency was {}", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_same_solution_reruns_serialize() {
        let (check, peak) = TrackingCheck::new();
        let checks: Arc<Vec<Box<dyn Check>>> = Arc::new(vec![Box::new(check)]);
        let scheduler = Scheduler::new(&config(6));
        let batch = vec![queued(7), queued(7)];

        let reports = scheduler
            .check_batch(checks, batch, Arc::new(RefusingRunner), RunTrigger::Submission)
            .await;
        assert!(reports.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_solution_locks_are_released_after_the_batch() {
        let (check, _) = TrackingCheck::new();
        let checks: Arc<Vec<Box<dyn Check>>> = Arc::new(vec![Box::new(check)]);
        let scheduler = Scheduler::new(&config(3));
        // includes a rerun pair, so a contended entry gets dropped too
        let batch = vec![queued(1), queued(2), queued(2)];

        let reports = scheduler
            .check_batch(checks, batch, Arc::new(RefusingRunner), RunTrigger::Submission)
            .await;
        assert!(reports.iter().all(|r| r.is_ok()));
        assert!(scheduler.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_carries_identity_and_verdict() {
        let (check, _) = TrackingCheck::new();
        let checks: Arc<Vec<Box<dyn Check>>> = Arc::new(vec![Box::new(check)]);
        let scheduler = Scheduler::new(&config(1));

        let reports = scheduler
            .check_batch(
                checks,
                vec![queued(41)],
                Arc::new(RefusingRunner),
                RunTrigger::Submission,
            )
            .await;
        let report = reports[0].as_ref().unwrap();
        assert_eq!(report.solution_id, 41);
        assert_eq!(report.task_id, 9);
        assert!(report.passed);
        assert_eq!(report.results.len(), 1);
    }
}
