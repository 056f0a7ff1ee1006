//! Test run reporting.

use serde::{Deserialize, Serialize};

use crate::assertion::Assertion;
use crate::case::Modifier;

/// Final status of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
    Todo,
}

/// Report for one test run.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub modifier: Modifier,
    pub status: CaseStatus,
    pub assertions: Vec<Assertion>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseReport {
    /// Report for a case that never executed.
    pub fn unexecuted(name: impl Into<String>, modifier: Modifier, status: CaseStatus) -> Self {
        Self {
            name: name.into(),
            modifier,
            status,
            assertions: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }
}

/// Details of a failed test kept in the suite report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub name: String,
    pub error: String,
}

/// Aggregate result of one suite run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    /// Failure details, tolerated ones included.
    pub failures: Vec<FailureInfo>,
    /// Non-zero iff any non-tolerated failure occurred.
    pub exit_code: i32,
    /// Per-case reports in completion order.
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one case report in. `counted` says whether a failure of this
    /// case affects the exit code (modifier policy and run mode decide).
    pub fn record(&mut self, report: CaseReport, counted: bool) {
        self.total += 1;
        match report.status {
            CaseStatus::Passed => self.passed += 1,
            CaseStatus::Failed | CaseStatus::TimedOut => {
                self.failed += 1;
                self.failures.push(FailureInfo {
                    name: report.name.clone(),
                    error: report.error.clone().unwrap_or_default(),
                });
                if counted {
                    self.exit_code = 1;
                }
            }
            CaseStatus::Skipped => self.skipped += 1,
            CaseStatus::Todo => self.todo += 1,
        }
        self.cases.push(report);
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(name: &str, modifier: Modifier) -> CaseReport {
        CaseReport {
            name: name.into(),
            modifier,
            status: CaseStatus::Failed,
            assertions: Vec::new(),
            duration_ms: 3,
            error: Some("boom".into()),
        }
    }

    #[test]
    fn tolerated_failures_do_not_set_exit_code() {
        let mut suite = SuiteReport::new();
        suite.record(failed("a", Modifier::Ignore), false);
        assert_eq!(suite.failed, 1);
        assert_eq!(suite.failures.len(), 1);
        assert_eq!(suite.exit_code, 0);

        suite.record(failed("b", Modifier::Normal), true);
        assert_eq!(suite.exit_code, 1);
    }

    #[test]
    fn counters_follow_status() {
        let mut suite = SuiteReport::new();
        suite.record(
            CaseReport::unexecuted("s", Modifier::Skip, CaseStatus::Skipped),
            false,
        );
        suite.record(
            CaseReport::unexecuted("t", Modifier::Todo, CaseStatus::Todo),
            false,
        );
        assert_eq!(suite.skipped, 1);
        assert_eq!(suite.todo, 1);
        assert_eq!(suite.total, 2);
    }
}
