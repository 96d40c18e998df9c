use super::error::SandboxError;
use super::workspace::copy_files;
use super::{CompletionKind, ExecutionRequest, ExecutionResult, ResourceLimits, SandboxManager};
use crate::config::SandboxConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

const STDIN_FILE: &str = "__stdin";
const STDOUT_FILE: &str = "__stdout";
const STDERR_FILE: &str = "__stderr";

/// Runs steps inside `isolate` boxes, one box per concurrent step.
#[derive(Debug)]
pub struct IsolateSandboxManager {
    isolate_bin: String,
    wall_time_grace: Duration,
    stdout_limit: usize,
    stderr_limit: usize,
    file_size_limit_kb: u64,
    process_limit: u32,
    path_env: String,
    boxes: BoxPool,
}

impl IsolateSandboxManager {
    pub fn new(config: &SandboxConfig, slots: usize) -> Self {
        Self {
            isolate_bin: config.isolate_bin.clone(),
            wall_time_grace: Duration::from_millis(config.wall_time_grace_ms),
            stdout_limit: config.stdout_limit_bytes,
            stderr_limit: config.stderr_limit_bytes,
            file_size_limit_kb: (config.file_size_limit_bytes / 1024).max(1),
            process_limit: config.process_limit,
            path_env: config.path_env.clone(),
            boxes: BoxPool::new(config.first_box_id, slots.max(1)),
        }
    }

    async fn init_box(&self, box_id: u32) -> Result<PathBuf, SandboxError> {
        let output = Command::new(&self.isolate_bin)
            .arg(format!("--box-id={box_id}"))
            .arg("--cg")
            .arg("--init")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Initialization(format!("failed to execute isolate --init: {err}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Initialization(format!(
                "isolate --init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let path_text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path_text.is_empty() {
            return Err(SandboxError::Initialization(
                "isolate --init did not return sandbox path".to_string(),
            ));
        }

        Ok(PathBuf::from(path_text).join("box"))
    }

    async fn cleanup_box(&self, box_id: u32) -> Result<(), SandboxError> {
        let output = Command::new(&self.isolate_bin)
            .arg(format!("--box-id={box_id}"))
            .arg("--cg")
            .arg("--cleanup")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Execution(format!("failed to execute isolate --cleanup: {err}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Execution(format!(
                "isolate --cleanup failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    fn run_args(
        &self,
        box_id: u32,
        meta_path: &Path,
        argv: &[String],
        limits: &ResourceLimits,
    ) -> Vec<String> {
        let time = limits.time_limit.as_secs_f64();
        let wall_time = (limits.time_limit + self.wall_time_grace).as_secs_f64();

        let mut args = vec![
            format!("--box-id={box_id}"),
            "--cg".to_string(),
            format!("--meta={}", meta_path.to_string_lossy()),
            format!("--time={time:.3}"),
            format!("--wall-time={wall_time:.3}"),
            format!("--cg-mem={}", limits.memory_limit_kb),
            format!("--fsize={}", self.file_size_limit_kb),
            format!("--processes={}", self.process_limit),
            format!("--env=PATH={}", self.path_env),
            "--env=HOME=/box".to_string(),
            "--env=LANG=C.UTF-8".to_string(),
            format!("--stdin={STDIN_FILE}"),
            format!("--stdout={STDOUT_FILE}"),
            format!("--stderr={STDERR_FILE}"),
            "--run".to_string(),
            "--".to_string(),
        ];
        args.extend(argv.iter().cloned());
        args
    }

    async fn run_in_box(
        &self,
        box_id: u32,
        box_dir: &Path,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionResult, SandboxError> {
        if request.argv.is_empty() {
            return Err(SandboxError::Execution(
                "isolate --run requires at least one program argument".to_string(),
            ));
        }

        copy_files(request.workspace.path(), box_dir, |_| true).await?;
        fs::write(box_dir.join(STDIN_FILE), request.stdin).await?;

        let meta_path = std::env::temp_dir().join(format!("judge-isolate-{box_id}.meta"));
        let output = Command::new(&self.isolate_bin)
            .args(self.run_args(box_id, &meta_path, request.argv, request.limits))
            .output()
            .await
            .map_err(|err| {
                SandboxError::Execution(format!("failed to execute isolate --run: {err}"))
            })?;

        match output.status.code() {
            Some(0) | Some(1) => {}
            _ => {
                return Err(SandboxError::Unknown(format!(
                    "isolate internal error: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        let content = fs::read_to_string(&meta_path).await.map_err(|err| {
            SandboxError::Execution(format!("failed to read isolate meta file: {err}"))
        })?;
        let _ = fs::remove_file(&meta_path).await;
        let meta = MetaFile::parse(&content);

        let (stdout, stdout_truncated) =
            read_capped(&box_dir.join(STDOUT_FILE), self.stdout_limit).await;
        let (stderr, stderr_truncated) =
            read_capped(&box_dir.join(STDERR_FILE), self.stderr_limit).await;

        // Compiled artifacts must reach the caller's workspace.
        copy_files(box_dir, request.workspace.path(), |name| {
            !name.starts_with("__")
        })
        .await?;

        let (kind, message) = meta.classify(request.limits)?;
        debug!(box_id, kind = ?kind, status = ?meta.status, "Isolate run finished");

        Ok(ExecutionResult {
            kind,
            exit_code: meta.exit_code,
            signal: meta.signal,
            cpu_time: meta.time,
            wall_time: meta.wall_time,
            memory_kb: meta.memory_kb,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            message,
        })
    }
}

#[async_trait]
impl SandboxManager for IsolateSandboxManager {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionResult, SandboxError> {
        let lease = self.boxes.acquire().await?;
        let box_dir = self.init_box(lease.id).await?;

        let result = self.run_in_box(lease.id, &box_dir, request).await;

        if let Err(e) = self.cleanup_box(lease.id).await {
            warn!(box_id = lease.id, error = %e, "Failed to clean up isolate box");
        }
        result
    }
}

/// Bounded set of isolate box ids.
#[derive(Debug)]
struct BoxPool {
    permits: Semaphore,
    free: Mutex<Vec<u32>>,
}

struct BoxLease<'a> {
    pool: &'a BoxPool,
    id: u32,
    _permit: SemaphorePermit<'a>,
}

impl BoxPool {
    fn new(first: u32, slots: usize) -> Self {
        let free = (0..slots as u32).rev().map(|i| first + i).collect();
        Self {
            permits: Semaphore::new(slots),
            free: Mutex::new(free),
        }
    }

    async fn acquire(&self) -> Result<BoxLease<'_>, SandboxError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SandboxError::Initialization("isolate box pool closed".into()))?;
        let id = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .ok_or_else(|| SandboxError::Initialization("no free isolate box".into()))?;
        Ok(BoxLease {
            pool: self,
            id,
            _permit: permit,
        })
    }
}

impl Drop for BoxLease<'_> {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.id);
    }
}

/// The `key:value` report isolate writes with `--meta`.
#[derive(Debug, Default)]
struct MetaFile {
    status: Option<String>,
    message: String,
    exit_code: Option<i32>,
    signal: Option<i32>,
    time: Duration,
    wall_time: Duration,
    memory_kb: Option<u64>,
    oom_killed: bool,
}

impl MetaFile {
    fn parse(content: &str) -> Self {
        let mut raw = HashMap::<&str, &str>::new();
        let mut oom_killed = false;

        for line in content.lines() {
            if let Some((key, value)) = line.split_once(':') {
                raw.insert(key.trim(), value.trim());
            } else if line.trim() == "cg-oom-killed" {
                oom_killed = true;
            }
        }
        if raw.contains_key("cg-oom-killed") {
            oom_killed = true;
        }

        let seconds = |key: &str| {
            raw.get(key)
                .and_then(|v| v.parse::<f64>().ok())
                .map(|s| Duration::from_secs_f64(s.max(0.0)))
                .unwrap_or_default()
        };

        Self {
            status: raw.get("status").map(|s| s.to_string()),
            message: raw.get("message").map(|s| s.to_string()).unwrap_or_default(),
            exit_code: raw.get("exitcode").and_then(|v| v.parse().ok()),
            signal: raw.get("exitsig").and_then(|v| v.parse().ok()),
            time: seconds("time"),
            wall_time: seconds("time-wall"),
            memory_kb: raw
                .get("cg-mem")
                .or_else(|| raw.get("max-rss"))
                .and_then(|v| v.parse().ok()),
            oom_killed,
        }
    }

    fn classify(&self, limits: &ResourceLimits) -> Result<(CompletionKind, String), SandboxError> {
        let over_memory =
            self.oom_killed || self.memory_kb.is_some_and(|kb| kb > limits.memory_limit_kb);

        let kind = match self.status.as_deref() {
            Some("TO") => CompletionKind::TimedOut,
            Some("SG") | Some("RE") if over_memory => CompletionKind::Killed,
            Some("SG") | Some("RE") => CompletionKind::Crashed,
            Some("XX") => {
                return Err(SandboxError::Execution(format!(
                    "isolate internal error: {}",
                    self.message
                )));
            }
            Some(other) => {
                return Err(SandboxError::Unknown(format!(
                    "unknown isolate status '{other}'"
                )));
            }
            None if self.exit_code.unwrap_or(0) == 0 => CompletionKind::Completed,
            None => CompletionKind::Crashed,
        };

        Ok((kind, self.message.clone()))
    }
}

/// Missing output files read as empty.
async fn read_capped(path: &Path, cap: usize) -> (String, bool) {
    let mut bytes = fs::read(path).await.unwrap_or_default();
    let truncated = bytes.len() > cap;
    bytes.truncate(cap);
    (String::from_utf8_lossy(&bytes).into_owned(), truncated)
}
