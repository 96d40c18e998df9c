//! Scripted sandbox for pipeline tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::error::SandboxError;
use super::workspace::Workspace;
use super::{ExecutionRequest, ExecutionResult, SandboxManager};

/// What a scripted step sees: the call index, argv, stdin and workspace.
pub(crate) struct Step<'a> {
    pub index: usize,
    pub argv: &'a [String],
    pub stdin: &'a [u8],
    pub workspace: &'a Workspace,
}

type Script = dyn Fn(Step<'_>) -> Result<ExecutionResult, SandboxError> + Send + Sync;

pub(crate) struct FakeSandbox {
    calls: AtomicUsize,
    argvs: Mutex<Vec<Vec<String>>>,
    script: Box<Script>,
}

impl FakeSandbox {
    pub fn new(
        script: impl Fn(Step<'_>) -> Result<ExecutionResult, SandboxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            argvs: Mutex::new(Vec::new()),
            script: Box::new(script),
        }
    }

    /// Every step echoes its stdin back.
    pub fn echo() -> Self {
        Self::new(|step| {
            Ok(ExecutionResult {
                stdout: String::from_utf8_lossy(step.stdin).into_owned(),
                ..ExecutionResult::default()
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.argvs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxManager for FakeSandbox {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionResult, SandboxError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.argvs.lock().unwrap().push(request.argv.to_vec());
        (self.script)(Step {
            index,
            argv: request.argv,
            stdin: request.stdin,
            workspace: request.workspace,
        })
    }
}
