//! Entry point for the ingress layer.

use std::sync::Arc;

use common::judge_job::JudgeJob;
use common::{Submission, SubmissionId, SubmissionStatus, Verdict};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::WorkerAppConfig;
use crate::error::{SubmitError, WorkerError};
use crate::models::judge::{CustomRunOutcome, Judge, JudgeError};
use crate::models::language::ToolchainRegistry;
use crate::models::queue::{JobQueue, QueueError};
use crate::models::sandbox::{ResourceLimits, SandboxManager, build_sandbox};
use crate::models::store::{
    CreateOutcome, ProblemRepository, StoreError, SubmissionRecord, SubmissionStore,
};
use crate::models::worker::WorkerPool;

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub submission_id: SubmissionId,
    pub user_id: i32,
    pub problem_id: i32,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued,
    /// The submission is already queued or being judged.
    Duplicate,
    /// The submission already has a final verdict.
    AlreadyJudged,
}

/// What a polling client sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub pending: bool,
    pub verdict: Option<Verdict>,
    pub verdict_display: String,
    pub code: String,
}

impl StatusView {
    pub fn from_status(status: SubmissionStatus) -> Self {
        Self {
            pending: !status.is_final(),
            verdict: status.verdict(),
            verdict_display: status.display_name().to_string(),
            code: status.short_code().to_string(),
        }
    }
}

/// Owns the queue and the worker pool. Must be created inside a tokio runtime.
pub struct JudgeService {
    problems: Arc<dyn ProblemRepository>,
    store: Arc<dyn SubmissionStore>,
    queue: Arc<JobQueue>,
    judge: Arc<Judge>,
    pool: WorkerPool,
    custom_limits: ResourceLimits,
}

impl JudgeService {
    /// Build with the sandbox backend named in `config`.
    pub fn new(
        config: &WorkerAppConfig,
        problems: Arc<dyn ProblemRepository>,
        store: Arc<dyn SubmissionStore>,
    ) -> Result<Self, WorkerError> {
        let sandbox = build_sandbox(&config.sandbox, config.worker.pool_size)?;
        Self::with_sandbox(config, problems, store, sandbox)
    }

    pub fn with_sandbox(
        config: &WorkerAppConfig,
        problems: Arc<dyn ProblemRepository>,
        store: Arc<dyn SubmissionStore>,
        sandbox: Arc<dyn SandboxManager>,
    ) -> Result<Self, WorkerError> {
        let toolchains = Arc::new(ToolchainRegistry::from_config(config)?);
        let judge = Arc::new(Judge::new(
            sandbox,
            toolchains,
            config.sandbox.work_root.clone(),
        ));
        let queue = Arc::new(JobQueue::new(config.worker.queue_capacity));
        let pool = WorkerPool::start(
            &config.worker.id,
            config.worker.pool_size,
            queue.clone(),
            judge.clone(),
            store.clone(),
        );

        Ok(Self {
            problems,
            store,
            queue,
            judge,
            pool,
            custom_limits: ResourceLimits::new(
                config.limits.default_time_limit_ms,
                config.limits.default_memory_limit_kb,
            ),
        })
    }

    /// Validate and enqueue a submission.
    ///
    /// Rejections happen before anything is stored or queued.
    #[instrument(skip_all, fields(submission_id = request.submission_id, problem_id = request.problem_id, language = %request.language))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, SubmitError> {
        if self.judge.toolchains().resolve(&request.language).is_err() {
            return Err(SubmitError::UnsupportedLanguage(request.language));
        }

        let problem = self
            .problems
            .get_problem(request.problem_id)
            .await?
            .ok_or(SubmitError::ProblemNotFound(request.problem_id))?;
        if !problem.has_test_cases() {
            return Err(SubmitError::NoTestCases(problem.id));
        }

        let slot = match self.queue.reserve(request.submission_id) {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                info!("Submission already in flight");
                return Ok(SubmitOutcome::Duplicate);
            }
            Err(QueueError::Full) => {
                warn!("Judge queue is full");
                return Err(SubmitError::QueueFull);
            }
            Err(QueueError::Closed) => return Err(SubmitError::ShuttingDown),
        };

        let submission = Submission::pending(
            request.submission_id,
            request.problem_id,
            request.user_id,
            request.language,
            request.code,
        );
        match self.store.create_pending(submission.clone()).await? {
            CreateOutcome::Created => {}
            CreateOutcome::Exists(status) if status.is_final() => {
                info!(status = %status, "Submission already judged");
                return Ok(SubmitOutcome::AlreadyJudged);
            }
            // Left unfinished by an earlier run; judge it now.
            CreateOutcome::Exists(status) => {
                info!(status = %status, "Re-enqueueing unfinished submission");
            }
        }

        let job = JudgeJob::new(&submission, &problem);
        info!(job_id = %job.job_id, test_cases = job.test_cases.len(), "Enqueued judge job");
        slot.commit(job);
        Ok(SubmitOutcome::Enqueued)
    }

    /// Current status, read straight from the store.
    pub async fn get_status(&self, id: SubmissionId) -> Result<Option<StatusView>, StoreError> {
        Ok(self.store.status(id).await?.map(StatusView::from_status))
    }

    /// Full record including the judge result, if any.
    pub async fn get_result(
        &self,
        id: SubmissionId,
    ) -> Result<Option<SubmissionRecord>, StoreError> {
        self.store.get(id).await
    }

    /// Compile and run `code` once against `input` with the default limits.
    pub async fn run_custom(
        &self,
        language: &str,
        code: &str,
        input: &str,
    ) -> Result<CustomRunOutcome, JudgeError> {
        self.judge
            .run_custom(language, code, input, &self.custom_limits)
            .await
    }

    /// `(tag, display name)` of every supported language.
    pub fn languages(&self) -> Vec<(&'static str, &'static str)> {
        let mut languages: Vec<_> = self
            .judge
            .toolchains()
            .languages()
            .map(|l| (l.tag(), l.display_name()))
            .collect();
        languages.sort();
        languages
    }

    /// Stop accepting work, finish queued jobs and stop the workers.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
