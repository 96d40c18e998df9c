use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SubmissionStatus;

/// Identifier assigned to a submission by the ingress layer.
pub type SubmissionId = i32;

/// A submission as tracked by the status store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub problem_id: i32,
    pub user_id: i32,
    /// Language tag, e.g. `py`, `cpp`, `c`.
    pub language: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub status: SubmissionStatus,
}

impl Submission {
    /// A new submission in the `Pending` state.
    pub fn pending(
        id: SubmissionId,
        problem_id: i32,
        user_id: i32,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            problem_id,
            user_id,
            language: language.into(),
            code: code.into(),
            created_at: Utc::now(),
            status: SubmissionStatus::Pending,
        }
    }
}
