pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod isolate;
pub mod jail;
pub mod process;
pub mod workspace;

use async_trait::async_trait;
use error::SandboxError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{NamespaceMode, SandboxBackend, SandboxConfig};
pub use isolate::IsolateSandboxManager;
pub use process::ProcessSandboxManager;
pub use workspace::Workspace;

/// Limits for one compile or run step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit. The wall-clock deadline adds the configured grace.
    pub time_limit: Duration,
    /// Memory ceiling in kilobytes.
    pub memory_limit_kb: u64,
}

impl ResourceLimits {
    pub fn new(time_limit_ms: u32, memory_limit_kb: u32) -> Self {
        Self {
            time_limit: Duration::from_millis(time_limit_ms as u64),
            memory_limit_kb: memory_limit_kb as u64,
        }
    }
}

/// How a sandboxed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    /// Exited with status 0 within all limits.
    Completed,
    /// Hit the CPU-time limit or the wall-clock deadline.
    TimedOut,
    /// Terminated for exceeding the memory ceiling.
    Killed,
    /// Non-zero exit or terminated by a signal.
    Crashed,
}

/// Outcome of a single compile or run step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub kind: CompletionKind,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub cpu_time: Duration,
    pub wall_time: Duration,
    /// Peak resident memory in kilobytes, when measurable.
    pub memory_kb: Option<u64>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Backend-specific description of the termination.
    pub message: String,
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.kind == CompletionKind::Completed
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            kind: CompletionKind::Completed,
            exit_code: Some(0),
            signal: None,
            cpu_time: Duration::ZERO,
            wall_time: Duration::ZERO,
            memory_kb: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            message: String::new(),
        }
    }
}

/// A single step to execute inside a workspace.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub workspace: &'a Workspace,
    pub argv: &'a [String],
    pub stdin: &'a [u8],
    pub limits: &'a ResourceLimits,
}

/// Executes one process tree under limits.
///
/// Files the step leaves in the workspace stay there after `execute`
/// returns, so compiled artifacts can be picked up by the caller.
#[async_trait]
pub trait SandboxManager: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Build the configured backend. `slots` bounds concurrent isolate boxes.
///
/// The process backend checks confinement once here and refuses to start
/// without it unless the operator asked for `best_effort` or `disabled`.
pub fn build_sandbox(
    config: &SandboxConfig,
    slots: usize,
) -> Result<Arc<dyn SandboxManager>, SandboxError> {
    match config.backend {
        SandboxBackend::Process => {
            let available = match config.namespaces {
                NamespaceMode::Disabled => false,
                _ => ProcessSandboxManager::new(config).confinement_available(),
            };
            let namespaces = resolve_namespaces(config.namespaces, available)?;
            if namespaces == NamespaceMode::Disabled {
                warn!(
                    requested = ?config.namespaces,
                    "Process sandbox is unconfined: steps share the host filesystem and network"
                );
            }
            info!(namespaces = ?namespaces, "Using process sandbox");
            let config = SandboxConfig {
                namespaces,
                ..config.clone()
            };
            Ok(Arc::new(ProcessSandboxManager::new(&config)))
        }
        SandboxBackend::Isolate => {
            info!(isolate_bin = %config.isolate_bin, slots, "Using isolate sandbox");
            Ok(Arc::new(IsolateSandboxManager::new(config, slots)))
        }
    }
}

/// The mode steps actually run under, given whether this host can confine.
fn resolve_namespaces(
    requested: NamespaceMode,
    available: bool,
) -> Result<NamespaceMode, SandboxError> {
    match (requested, available) {
        (NamespaceMode::Disabled, _) => Ok(NamespaceMode::Disabled),
        (_, true) => Ok(NamespaceMode::Required),
        (NamespaceMode::BestEffort, false) => Ok(NamespaceMode::Disabled),
        (NamespaceMode::Required, false) => Err(SandboxError::Initialization(
            "user, mount and network namespaces are unavailable; \
             set sandbox.namespaces = \"disabled\" to run steps unconfined"
                .into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_without_namespaces_refuses_to_start() {
        let err = resolve_namespaces(NamespaceMode::Required, false).unwrap_err();
        assert!(matches!(err, SandboxError::Initialization(_)));
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn best_effort_falls_back_only_when_unavailable() {
        assert_eq!(
            resolve_namespaces(NamespaceMode::BestEffort, true).unwrap(),
            NamespaceMode::Required
        );
        assert_eq!(
            resolve_namespaces(NamespaceMode::BestEffort, false).unwrap(),
            NamespaceMode::Disabled
        );
    }

    #[test]
    fn disabled_stays_disabled() {
        assert_eq!(
            resolve_namespaces(NamespaceMode::Disabled, true).unwrap(),
            NamespaceMode::Disabled
        );
    }

    #[test]
    fn default_process_backend_is_confined_or_refused() {
        let config = SandboxConfig::default();
        assert_eq!(config.namespaces, NamespaceMode::Required);
        let available = ProcessSandboxManager::new(&config).confinement_available();
        assert_eq!(build_sandbox(&config, 1).is_ok(), available);
    }
}
