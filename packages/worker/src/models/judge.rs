//! Compile, run every test case in order and fold the verdicts.

use std::path::PathBuf;
use std::sync::Arc;

use common::judge_job::JudgeJob;
use common::judge_result::{JudgeResult, JudgeSystemErrorInfo, TestCaseJudgeResult};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::models::evaluator::{VerdictAggregator, judge_test_case};
use crate::models::language::{Toolchain, ToolchainError, ToolchainRegistry};
use crate::models::sandbox::error::SandboxError;
use crate::models::sandbox::{
    ExecutionRequest, ExecutionResult, ResourceLimits, SandboxManager, Workspace,
};

pub const WORKSPACE_ERROR: &str = "WORKSPACE_ERROR";
pub const SANDBOX_ERROR: &str = "SANDBOX_ERROR";
pub const TOOLCHAIN_ERROR: &str = "TOOLCHAIN_ERROR";
pub const NO_TEST_CASES: &str = "NO_TEST_CASES";
pub const WORKER_PANIC: &str = "WORKER_PANIC";

/// Platform failures while judging. User-code failures are verdicts instead.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("workspace setup failed: {0}")]
    Workspace(#[source] SandboxError),

    #[error("sandbox failed: {0}")]
    Sandbox(#[source] SandboxError),

    #[error("job has no test cases")]
    NoTestCases,
}

impl JudgeError {
    /// Machine-readable code recorded with `JudgeFailed`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Toolchain(_) => TOOLCHAIN_ERROR,
            Self::Workspace(_) => WORKSPACE_ERROR,
            // The compiler or interpreter is not installed.
            Self::Sandbox(SandboxError::Spawn { .. }) => TOOLCHAIN_ERROR,
            Self::Sandbox(_) => SANDBOX_ERROR,
            Self::NoTestCases => NO_TEST_CASES,
        }
    }
}

/// Result of a one-off playground run.
#[derive(Debug, Clone)]
pub enum CustomRunOutcome {
    CompilationError { output: String },
    Executed(ExecutionResult),
}

/// The judging pipeline shared by all workers.
pub struct Judge {
    sandbox: Arc<dyn SandboxManager>,
    toolchains: Arc<ToolchainRegistry>,
    work_root: Option<PathBuf>,
}

impl Judge {
    pub fn new(
        sandbox: Arc<dyn SandboxManager>,
        toolchains: Arc<ToolchainRegistry>,
        work_root: Option<PathBuf>,
    ) -> Self {
        Self {
            sandbox,
            toolchains,
            work_root,
        }
    }

    pub fn toolchains(&self) -> &ToolchainRegistry {
        &self.toolchains
    }

    /// Judge a job. Platform failures become `JudgeFailed` results.
    #[instrument(skip_all, fields(submission_id = job.submission_id, job_id = %job.job_id, language = %job.language))]
    pub async fn judge(&self, job: &JudgeJob) -> JudgeResult {
        match self.try_judge(job).await {
            Ok(result) => {
                info!(status = %result.status, "Judging finished");
                result
            }
            Err(e) => {
                error!(code = e.code(), error = ?e, "Judging failed");
                JudgeResult::system_error(
                    job.job_id.clone(),
                    job.submission_id,
                    JudgeSystemErrorInfo::new(e.code(), e.to_string()),
                )
            }
        }
    }

    async fn try_judge(&self, job: &JudgeJob) -> Result<JudgeResult, JudgeError> {
        if job.test_cases.is_empty() {
            return Err(JudgeError::NoTestCases);
        }
        let toolchain = self.toolchains.resolve(&job.language)?;
        let build = self.build_workspace(toolchain, &job.source).await?;

        if let Some(output) = self.compile(toolchain, &build).await? {
            info!("Compilation failed");
            return Ok(JudgeResult::compilation_error(
                job.job_id.clone(),
                job.submission_id,
                output,
            ));
        }

        let limits = ResourceLimits::new(job.time_limit_ms, job.memory_limit_kb);
        let argv = toolchain.run_command();
        let mut aggregator = VerdictAggregator::new();
        let mut results = Vec::with_capacity(job.test_cases.len());

        for test_case in &job.test_cases {
            let execution = self
                .run_step(&build, &argv, test_case.input.as_bytes(), &limits)
                .await?;
            let verdict = judge_test_case(&execution, &test_case.expected_output);
            debug!(
                test_case_id = test_case.id,
                verdict = %verdict,
                kind = ?execution.kind,
                cpu_ms = execution.cpu_time.as_millis() as u64,
                "Test case judged"
            );

            results.push(TestCaseJudgeResult {
                test_case_id: test_case.id,
                verdict,
                time_used_ms: execution.cpu_time.as_millis() as u64,
                wall_time_used_ms: execution.wall_time.as_millis() as u64,
                memory_used_kb: execution.memory_kb,
                exit_code: execution.exit_code,
                stderr: (!execution.stderr.is_empty()).then_some(execution.stderr),
            });

            if !aggregator.record(verdict) {
                break;
            }
        }

        let verdict = aggregator.finish().ok_or(JudgeError::NoTestCases)?;
        Ok(JudgeResult::judged(
            job.job_id.clone(),
            job.submission_id,
            verdict,
            results,
        ))
    }

    /// Compile (if needed) and run once against `input`. Nothing is persisted.
    #[instrument(skip(self, code, input, limits))]
    pub async fn run_custom(
        &self,
        language: &str,
        code: &str,
        input: &str,
        limits: &ResourceLimits,
    ) -> Result<CustomRunOutcome, JudgeError> {
        let toolchain = self.toolchains.resolve(language)?;
        let build = self.build_workspace(toolchain, code).await?;

        if let Some(output) = self.compile(toolchain, &build).await? {
            return Ok(CustomRunOutcome::CompilationError { output });
        }

        let execution = self
            .run_step(&build, &toolchain.run_command(), input.as_bytes(), limits)
            .await?;
        Ok(CustomRunOutcome::Executed(execution))
    }

    async fn build_workspace(
        &self,
        toolchain: &Toolchain,
        source: &str,
    ) -> Result<Workspace, JudgeError> {
        let workspace =
            Workspace::create(self.work_root.as_deref()).map_err(JudgeError::Workspace)?;
        workspace
            .write_file(toolchain.source_file(), source.as_bytes())
            .await
            .map_err(JudgeError::Workspace)?;
        Ok(workspace)
    }

    /// Returns the compiler output when compilation fails.
    async fn compile(
        &self,
        toolchain: &Toolchain,
        build: &Workspace,
    ) -> Result<Option<String>, JudgeError> {
        let Some(argv) = toolchain.compile_command() else {
            return Ok(None);
        };

        let result = self
            .sandbox
            .execute(ExecutionRequest {
                workspace: build,
                argv: &argv,
                stdin: &[],
                limits: &toolchain.compile_limits,
            })
            .await
            .map_err(JudgeError::Sandbox)?;

        if result.is_completed() {
            debug!(cpu_ms = result.cpu_time.as_millis() as u64, "Compiled");
            return Ok(None);
        }

        debug!(kind = ?result.kind, exit_code = ?result.exit_code, "Compiler rejected source");
        let mut output = result.stderr;
        output.push_str(&result.stdout);
        if output.trim().is_empty() {
            output = if result.message.is_empty() {
                format!("compiler finished with {:?}", result.kind)
            } else {
                result.message
            };
        }
        Ok(Some(output))
    }

    /// Run in a fresh workspace holding only the build artifacts.
    async fn run_step(
        &self,
        build: &Workspace,
        argv: &[String],
        stdin: &[u8],
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, JudgeError> {
        let run = Workspace::create(self.work_root.as_deref()).map_err(JudgeError::Workspace)?;
        run.copy_files_from(build)
            .await
            .map_err(JudgeError::Workspace)?;

        self.sandbox
            .execute(ExecutionRequest {
                workspace: &run,
                argv,
                stdin,
                limits,
            })
            .await
            .map_err(JudgeError::Sandbox)
    }
}
