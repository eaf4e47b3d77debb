//! Policy - ordering, acceptance and visibility rules
//!
//! Pure decisions over checker metadata and finished results. The full
//! result list is the staff view; `student_visible` narrows it down to
//! what a submitter gets to see.

use crate::checker::{Check, CheckResult, CheckState};

/// Sort checkers by their declared position index. Equal indices keep
/// their declaration order.
pub fn execution_order(checks: &mut [&dyn Check]) {
    checks.sort_by_key(|check| check.meta().order);
}

/// Whether the solution is accepted: every required check passed, or the
/// operator accepts all solutions regardless of results.
pub fn accepted(results: &[CheckResult], accept_all_solutions: bool) -> bool {
    accept_all_solutions || results.iter().filter(|r| r.required).all(|r| r.passed)
}

/// The submitter's view: public results of checks that actually ran.
/// After a critical failure everything later is `not_run` and stays
/// hidden, so the cut ends with the failure itself.
pub fn student_visible(results: &[CheckResult]) -> Vec<&CheckResult> {
    results
        .iter()
        .filter(|r| r.public && r.state != CheckState::NotRun)
        .collect()
}
