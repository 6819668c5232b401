use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{ExecutionError, ExecutionResult, ExecutorReply, TestRecord, TestStatus};

/// BDD harness evaluated before the submission. Provides `describe`, `it`,
/// hooks, `expect`/`assert`, a capturing `console` and the `__codebox` handle.
pub const PRELUDE: &str = include_str!("prelude.js");

/// Expression that runs every test registered since the last run.
///
/// The runner clears its result buffer before running and drops the
/// registered suites afterwards, so nothing carries over between requests.
pub const RUN_TRIGGER: &str = "__codebox.runner.run()";

/// Expression yielding the settled outcome as a JSON string, or `null`
pub const OUTCOME_QUERY: &str = "__codebox.outcome()";

/// Expression firing the earliest virtual timer; yields whether one fired
pub const TIMER_TICK: &str = "__codebox.tick()";

/// Aggregate pass/fail count over a run
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestTally {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl TestTally {
    pub fn from_records(records: &[TestRecord]) -> Self {
        let passed = records
            .iter()
            .filter(|r| r.status == TestStatus::Passed)
            .count();
        Self {
            passed,
            failed: records.len() - passed,
            total: records.len(),
        }
    }

    /// A run succeeds when at least one test ran and none failed
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.total > 0
    }
}

/// Shape of the object the harness settles with
#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Settled {
    Completed(ExecutionResult),
    Failed { error: ExecutionError },
}

/// Converts the harness outcome JSON into a reply
pub fn parse_outcome(json: &str) -> Result<ExecutorReply> {
    let settled: Settled =
        serde_json::from_str(json).with_context(|| format!("Malformed harness outcome: {json}"))?;

    Ok(match settled {
        Settled::Completed(result) => ExecutorReply::Result(result),
        Settled::Failed { error } => ExecutorReply::Error(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(title: &str, status: TestStatus) -> TestRecord {
        TestRecord {
            title: title.to_string(),
            status,
            parent_title: "Suite".to_string(),
            duration: 0.0,
            error: None,
        }
    }

    #[test]
    fn test_tally() {
        let records = vec![
            record("a", TestStatus::Passed),
            record("b", TestStatus::Failed),
            record("c", TestStatus::Passed),
        ];
        let tally = TestTally::from_records(&records);
        assert_eq!(
            tally,
            TestTally {
                passed: 2,
                failed: 1,
                total: 3
            }
        );
        assert!(!tally.succeeded());
    }

    #[test]
    fn test_empty_run_is_not_a_success() {
        assert!(!TestTally::from_records(&[]).succeeded());
        assert!(TestTally::from_records(&[record("a", TestStatus::Passed)]).succeeded());
    }

    #[test]
    fn test_parse_completed_outcome() {
        let reply = parse_outcome(
            r#"{"kind":"completed","testResults":[{"title":"adds","status":"failed","parentTitle":"Math","duration":0.2,"error":"AssertionError: nope"}],"timeTaken":0.01,"message":"[3,7]","logs":["hi"]}"#,
        )
        .unwrap();

        let ExecutorReply::Result(result) = reply else {
            panic!("expected a result");
        };
        assert_eq!(result.message, "[3,7]");
        assert_eq!(result.logs, vec!["hi".to_string()]);
        assert_eq!(result.test_results[0].status, TestStatus::Failed);
        assert_eq!(
            result.test_results[0].error.as_deref(),
            Some("AssertionError: nope")
        );
    }

    #[test]
    fn test_parse_failed_outcome() {
        let reply =
            parse_outcome(r#"{"kind":"failed","error":{"name":"TypeError","message":"boom"}}"#)
                .unwrap();
        assert_eq!(
            reply,
            ExecutorReply::Error(ExecutionError::new("TypeError", "boom"))
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_outcome("not json").is_err());
        assert!(parse_outcome(r#"{"kind":"other"}"#).is_err());
    }

    #[test]
    fn test_prelude_defines_harness() {
        for name in ["var __codebox", "global.describe", "global.expect", "settle"] {
            assert!(PRELUDE.contains(name), "prelude lacks {name}");
        }
    }
}
