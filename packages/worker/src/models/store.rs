//! Data-access boundary: submission state and read-only problems.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::judge_result::JudgeResult;
use common::{Problem, Submission, SubmissionId, SubmissionStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),

    #[error("submission {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("problem {id} could not be loaded: {message}")]
    ProblemLoad { id: i32, message: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result of `create_pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record with this id already exists in the given state.
    Exists(SubmissionStatus),
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub submission: Submission,
    pub result: Option<JudgeResult>,
    pub judged_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    pub fn status(&self) -> SubmissionStatus {
        self.submission.status
    }
}

/// Authoritative submission state.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a `Pending` record unless one already exists.
    async fn create_pending(&self, submission: Submission) -> Result<CreateOutcome, StoreError>;

    /// `Pending -> Running`. Repeating it is harmless.
    async fn mark_running(&self, id: SubmissionId) -> Result<(), StoreError>;

    /// Write the terminal state. Returns `false` and changes nothing when the
    /// submission is already final.
    async fn record_result(&self, result: &JudgeResult) -> Result<bool, StoreError>;

    async fn status(&self, id: SubmissionId) -> Result<Option<SubmissionStatus>, StoreError>;

    async fn get(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    records: DashMap<SubmissionId, SubmissionRecord>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn create_pending(&self, submission: Submission) -> Result<CreateOutcome, StoreError> {
        match self.records.entry(submission.id) {
            Entry::Occupied(existing) => Ok(CreateOutcome::Exists(existing.get().status())),
            Entry::Vacant(slot) => {
                let mut submission = submission;
                submission.status = SubmissionStatus::Pending;
                slot.insert(SubmissionRecord {
                    submission,
                    result: None,
                    judged_at: None,
                });
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn mark_running(&self, id: SubmissionId) -> Result<(), StoreError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;

        let current = record.status();
        if current.is_final() {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: SubmissionStatus::Running,
            });
        }
        record.submission.status = SubmissionStatus::Running;
        Ok(())
    }

    async fn record_result(&self, result: &JudgeResult) -> Result<bool, StoreError> {
        let id = result.submission_id;
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;

        let current = record.status();
        if !result.status.is_final() {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: result.status,
            });
        }
        if current.is_final() {
            info!(
                submission_id = id,
                status = %current,
                "Submission already processed, skipping"
            );
            return Ok(false);
        }

        record.submission.status = result.status;
        record.result = Some(result.clone());
        record.judged_at = Some(Utc::now());
        Ok(true)
    }

    async fn status(&self, id: SubmissionId) -> Result<Option<SubmissionStatus>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.status()))
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }
}

/// Read-only problem lookup.
#[async_trait]
pub trait ProblemRepository: Send + Sync {
    async fn get_problem(&self, id: i32) -> Result<Option<Problem>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryProblemRepository {
    problems: DashMap<i32, Problem>,
}

impl InMemoryProblemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, problem: Problem) {
        self.problems.insert(problem.id, problem);
    }
}

impl FromIterator<Problem> for InMemoryProblemRepository {
    fn from_iter<I: IntoIterator<Item = Problem>>(iter: I) -> Self {
        let repository = Self::new();
        for problem in iter {
            repository.insert(problem);
        }
        repository
    }
}

#[async_trait]
impl ProblemRepository for InMemoryProblemRepository {
    async fn get_problem(&self, id: i32) -> Result<Option<Problem>, StoreError> {
        Ok(self.problems.get(&id).map(|p| p.value().clone()))
    }
}

/// Problems stored as `<dir>/<id>.toml`.
#[derive(Debug, Clone)]
pub struct FileProblemRepository {
    dir: PathBuf,
}

impl FileProblemRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: i32) -> PathBuf {
        self.dir.join(format!("{id}.toml"))
    }
}

async fn load_problem_file(path: &Path, id: i32) -> anyhow::Result<Problem> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let problem = Problem::from_toml_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    anyhow::ensure!(
        problem.id == id,
        "{} declares problem id {}",
        path.display(),
        problem.id
    );
    Ok(problem)
}

#[async_trait]
impl ProblemRepository for FileProblemRepository {
    async fn get_problem(&self, id: i32) -> Result<Option<Problem>, StoreError> {
        let path = self.path_for(id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        load_problem_file(&path, id).await.map(Some).map_err(|e| {
            warn!(problem_id = id, error = %format!("{e:#}"), "Failed to load problem");
            StoreError::ProblemLoad {
                id,
                message: format!("{e:#}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Verdict;
    use common::judge_result::JudgeSystemErrorInfo;

    fn submission(id: SubmissionId) -> Submission {
        Submission::pending(id, 1, 42, "py", "print(input())")
    }

    #[tokio::test]
    async fn create_pending_is_idempotent() {
        let store = InMemorySubmissionStore::new();
        assert_eq!(
            store.create_pending(submission(1)).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create_pending(submission(1)).await.unwrap(),
            CreateOutcome::Exists(SubmissionStatus::Pending)
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_reaches_exactly_one_terminal_state() {
        let store = InMemorySubmissionStore::new();
        store.create_pending(submission(1)).await.unwrap();
        store.mark_running(1).await.unwrap();
        assert_eq!(
            store.status(1).await.unwrap(),
            Some(SubmissionStatus::Running)
        );

        let accepted = JudgeResult::judged("job".into(), 1, Verdict::Accepted, vec![]);
        assert!(store.record_result(&accepted).await.unwrap());

        let failed = JudgeResult::system_error(
            "job".into(),
            1,
            JudgeSystemErrorInfo::new("SANDBOX_ERROR", "late"),
        );
        assert!(!store.record_result(&failed).await.unwrap());

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.status(), SubmissionStatus::Accepted);
        assert!(record.judged_at.is_some());
        assert_eq!(
            record.result.unwrap().verdict,
            Some(Verdict::Accepted)
        );

        assert!(matches!(
            store.mark_running(1).await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_submission_is_reported() {
        let store = InMemorySubmissionStore::new();
        assert_eq!(store.status(9).await.unwrap(), None);
        assert!(matches!(
            store.mark_running(9).await,
            Err(StoreError::SubmissionNotFound(9))
        ));
    }

    #[tokio::test]
    async fn non_terminal_result_is_rejected() {
        let store = InMemorySubmissionStore::new();
        store.create_pending(submission(1)).await.unwrap();
        let mut result = JudgeResult::judged("job".into(), 1, Verdict::Accepted, vec![]);
        result.status = SubmissionStatus::Running;
        assert!(store.record_result(&result).await.is_err());
    }

    const PROBLEM: &str = r#"
id = 3
short_code = "echo"
name = "Echo"
time_limit_ms = 1000
memory_limit_kb = 65536

[[test_case]]
id = 1
input = "hi\n"
expected_output = "hi\n"
"#;

    #[tokio::test]
    async fn file_repository_loads_by_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("3.toml"), PROBLEM).unwrap();
        let repository = FileProblemRepository::new(dir.path());

        let problem = repository.get_problem(3).await.unwrap().unwrap();
        assert_eq!(problem.short_code, "echo");
        assert_eq!(problem.test_cases.len(), 1);
        assert!(repository.get_problem(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_repository_rejects_mismatched_or_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("5.toml"), PROBLEM).unwrap();
        std::fs::write(dir.path().join("6.toml"), "id = ").unwrap();
        let repository = FileProblemRepository::new(dir.path());

        assert!(matches!(
            repository.get_problem(5).await,
            Err(StoreError::ProblemLoad { id: 5, .. })
        ));
        assert!(matches!(
            repository.get_problem(6).await,
            Err(StoreError::ProblemLoad { id: 6, .. })
        ));
    }

    #[tokio::test]
    async fn in_memory_repository_collects_problems() {
        let problem = Problem::from_toml_str(PROBLEM).unwrap();
        let repository: InMemoryProblemRepository = [problem].into_iter().collect();
        assert!(repository.get_problem(3).await.unwrap().is_some());
        assert!(repository.get_problem(1).await.unwrap().is_none());
    }
}
