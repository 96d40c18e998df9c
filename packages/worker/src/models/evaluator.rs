//! Per-test verdicts and folding them into a submission verdict.

use common::Verdict;

use crate::models::sandbox::{CompletionKind, ExecutionResult};

/// Compare program output with the expected answer.
///
/// Trailing whitespace on each line (including `\r`) and trailing blank lines
/// are ignored. Everything else must match exactly.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    let normalize = |s: &str| -> Vec<String> {
        let mut lines: Vec<String> = s.lines().map(|l| l.trim_end().to_string()).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    };
    normalize(actual) == normalize(expected)
}

/// Verdict for one executed test case.
pub fn judge_test_case(result: &ExecutionResult, expected_output: &str) -> Verdict {
    match result.kind {
        CompletionKind::TimedOut => Verdict::TimeLimitExceeded,
        CompletionKind::Crashed | CompletionKind::Killed => Verdict::RuntimeError,
        CompletionKind::Completed => {
            if result.stdout_truncated || !outputs_match(&result.stdout, expected_output) {
                Verdict::WrongAnswer
            } else {
                Verdict::Accepted
            }
        }
    }
}

/// Folds per-test verdicts; the first failure decides the submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerdictAggregator {
    recorded: usize,
    failure: Option<Verdict>,
}

impl VerdictAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verdict. Returns `false` once judging should stop.
    pub fn record(&mut self, verdict: Verdict) -> bool {
        self.recorded += 1;
        if verdict.is_accepted() {
            return self.failure.is_none();
        }
        self.failure = Some(match self.failure {
            Some(current) if current.precedence() >= verdict.precedence() => current,
            _ => verdict,
        });
        false
    }

    /// `None` when nothing was recorded: no test ran, so nothing passed.
    pub fn finish(self) -> Option<Verdict> {
        match self.failure {
            Some(verdict) => Some(verdict),
            None if self.recorded > 0 => Some(Verdict::Accepted),
            None => None,
        }
    }
}

/// Fold verdicts in order, stopping at the first failure.
pub fn fold_verdicts(verdicts: impl IntoIterator<Item = Verdict>) -> Option<Verdict> {
    let mut aggregator = VerdictAggregator::new();
    for verdict in verdicts {
        if !aggregator.record(verdict) {
            break;
        }
    }
    aggregator.finish()
}
