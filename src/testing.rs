//! Shared test doubles for runner-dependent tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::runner::{ExecRequest, ProcessOutcome, Runner};

pub fn ok_outcome(output: &str) -> ProcessOutcome {
    ProcessOutcome {
        output: output.to_string(),
        exit_code: 0,
        timed_out: false,
        oom: false,
        truncated: false,
        time_ms: 5,
    }
}

pub fn failed_outcome(exit_code: i32, output: &str) -> ProcessOutcome {
    ProcessOutcome {
        output: output.to_string(),
        exit_code,
        timed_out: false,
        oom: false,
        truncated: false,
        time_ms: 5,
    }
}

pub fn timed_out_outcome(output: &str) -> ProcessOutcome {
    ProcessOutcome {
        output: output.to_string(),
        exit_code: 128 + 9,
        timed_out: true,
        oom: false,
        truncated: false,
        time_ms: 5,
    }
}

pub fn oom_outcome(output: &str) -> ProcessOutcome {
    ProcessOutcome {
        output: output.to_string(),
        exit_code: 128 + 9,
        timed_out: false,
        oom: true,
        truncated: false,
        time_ms: 5,
    }
}

/// Clean exit whose output was cut at the runner's retention cap
pub fn truncated_outcome(output: &str) -> ProcessOutcome {
    ProcessOutcome {
        truncated: true,
        ..ok_outcome(output)
    }
}

/// Runner that replays scripted outcomes and records every request.
///
/// Panics when executed more often than outcomes were scripted, so a test
/// notices every unexpected invocation.
pub struct StubRunner {
    outcomes: Mutex<VecDeque<ProcessOutcome>>,
    pub requests: Mutex<Vec<ExecRequest>>,
}

impl StubRunner {
    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ProcessOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(output: &str) -> Self {
        Self::with_outcomes([ok_outcome(output)])
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> ExecRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Runner for StubRunner {
    async fn execute(&self, req: &ExecRequest) -> ProcessOutcome {
        self.requests.lock().unwrap().push(req.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("runner executed more often than scripted")
    }
}

/// Runner that fails the test as soon as anything executes through it
pub struct RefusingRunner;

#[async_trait]
impl Runner for RefusingRunner {
    async fn execute(&self, req: &ExecRequest) -> ProcessOutcome {
        panic!("no process may run here, got {:?}", req.argv);
    }
}
