use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Problem, Submission, SubmissionId};

/// Test case data needed for judging.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCaseData {
    /// Test case ID
    pub id: i32,
    /// Input data to feed to the program
    pub input: String,
    /// Expected output for comparison
    pub expected_output: String,
}

/// A judge job handed to exactly one worker.
///
/// Carries everything needed to judge without querying the problem store
/// again while the job is in flight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeJob {
    /// Job identifier (UUID)
    pub job_id: String,
    /// ID of the submission being judged
    pub submission_id: SubmissionId,
    /// ID of the problem
    pub problem_id: i32,
    /// Language tag (e.g., "cpp", "c", "py")
    pub language: String,
    /// Source code
    pub source: String,
    /// Time limit in milliseconds
    pub time_limit_ms: u32,
    /// Memory limit in kilobytes
    pub memory_limit_kb: u32,
    /// Test cases, in judging order
    pub test_cases: Vec<TestCaseData>,
}

impl JudgeJob {
    /// Create a new judge job with a generated UUID.
    pub fn new(submission: &Submission, problem: &Problem) -> Self {
        let test_cases = problem
            .ordered_test_cases()
            .into_iter()
            .map(|tc| TestCaseData {
                id: tc.id,
                input: tc.input,
                expected_output: tc.expected_output,
            })
            .collect();

        Self {
            job_id: Uuid::new_v4().to_string(),
            submission_id: submission.id,
            problem_id: problem.id,
            language: submission.language.clone(),
            source: submission.code.clone(),
            time_limit_ms: problem.time_limit_ms,
            memory_limit_kb: problem.memory_limit_kb,
            test_cases,
        }
    }
}
