use crate::{SubmissionId, SubmissionStatus, Verdict};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeSystemErrorInfo {
    /// Machine-readable error code (e.g., "SANDBOX_ERROR", "WORKSPACE_ERROR").
    pub code: String,
    /// Human-readable error description.
    pub message: String,
}

impl JudgeSystemErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result from worker after judging a submission.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JudgeResult {
    /// Original job ID.
    pub job_id: String,
    /// Submission that was judged.
    pub submission_id: SubmissionId,
    /// Final status after judging. Always a final state.
    pub status: SubmissionStatus,
    /// Verdict attributed to the code (None for internal failures).
    pub verdict: Option<Verdict>,
    /// Maximum CPU time used across executed test cases (milliseconds).
    pub time_used_ms: Option<u64>,
    /// Maximum memory used across executed test cases (kilobytes).
    pub memory_used_kb: Option<u64>,
    /// Compiler output (stderr then stdout) when compilation failed.
    pub compile_output: Option<String>,
    /// Structured error info (only for JudgeFailed status).
    pub error_info: Option<JudgeSystemErrorInfo>,
    /// Results of the test cases that were actually executed, in order.
    pub test_case_results: Vec<TestCaseJudgeResult>,
}

impl JudgeResult {
    /// Create a result indicating an internal judge failure.
    pub fn system_error(
        job_id: String,
        submission_id: SubmissionId,
        error_info: JudgeSystemErrorInfo,
    ) -> Self {
        Self {
            job_id,
            submission_id,
            status: SubmissionStatus::JudgeFailed,
            verdict: None,
            time_used_ms: None,
            memory_used_kb: None,
            compile_output: None,
            error_info: Some(error_info),
            test_case_results: vec![],
        }
    }

    /// Create a result for a submission that failed to compile.
    pub fn compilation_error(
        job_id: String,
        submission_id: SubmissionId,
        compile_output: String,
    ) -> Self {
        Self {
            job_id,
            submission_id,
            status: SubmissionStatus::CompilationError,
            verdict: Some(Verdict::CompilationError),
            time_used_ms: None,
            memory_used_kb: None,
            compile_output: Some(compile_output),
            error_info: None,
            test_case_results: vec![],
        }
    }

    /// Create a result from the executed test cases and their folded verdict.
    pub fn judged(
        job_id: String,
        submission_id: SubmissionId,
        verdict: Verdict,
        test_case_results: Vec<TestCaseJudgeResult>,
    ) -> Self {
        let time_used_ms = test_case_results.iter().map(|r| r.time_used_ms).max();
        let memory_used_kb = test_case_results
            .iter()
            .filter_map(|r| r.memory_used_kb)
            .max();

        Self {
            job_id,
            submission_id,
            status: verdict.into(),
            verdict: Some(verdict),
            time_used_ms,
            memory_used_kb,
            compile_output: None,
            error_info: None,
            test_case_results,
        }
    }
}

/// Result for a single test case execution.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TestCaseJudgeResult {
    /// Test case ID that was executed.
    pub test_case_id: i32,
    /// Verdict for this test case.
    pub verdict: Verdict,
    /// CPU time used in milliseconds.
    pub time_used_ms: u64,
    /// Wall time used in milliseconds.
    pub wall_time_used_ms: u64,
    /// Peak memory in kilobytes, when measurable.
    pub memory_used_kb: Option<u64>,
    /// Exit code of the program, if it exited normally.
    pub exit_code: Option<i32>,
    /// Program stderr (bounded).
    pub stderr: Option<String>,
}
