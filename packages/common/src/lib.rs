pub mod judge_job;
pub mod judge_result;
pub mod problem;
pub mod submission;
pub mod submission_status;

pub use problem::{Problem, TestCase};
pub use submission::{Submission, SubmissionId};
pub use submission_status::{SubmissionStatus, Verdict};
