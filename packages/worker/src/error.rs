use thiserror::Error;

use crate::models::language::ToolchainError;
use crate::models::sandbox::error::SandboxError;
use crate::models::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Rejections returned by `JudgeService::submit` before anything is enqueued.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Problem {0} not found")]
    ProblemNotFound(i32),

    #[error("Problem {0} has no test cases")]
    NoTestCases(i32),

    #[error("Judge queue is full")]
    QueueFull,

    #[error("Judge is shutting down")]
    ShuttingDown,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
