//! Local process sandbox.
//!
//! Each step runs as a fresh process group with a cleared environment and
//! kernel rlimits, confined to a private root (see [`super::jail`]). A
//! blocking monitor loop reaps the child with `wait4`, samples the resident
//! memory of the whole group and kills it at the wall-clock deadline or when
//! the memory ceiling is crossed.

use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::SandboxError;
use super::jail::{JAIL_WORKDIR, Jail, MountPlan};
use super::{CompletionKind, ExecutionRequest, ExecutionResult, ResourceLimits, SandboxManager};
use crate::config::{NamespaceMode, SandboxConfig};

const READ_CHUNK: usize = 8192;
/// How long to wait for the output pipes to close once the group is dead.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Summing the group walks all of `/proc`, so it runs less often than the poll.
const GROUP_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct Settings {
    wall_time_grace: Duration,
    poll_interval: Duration,
    stdout_limit: usize,
    stderr_limit: usize,
    file_size_limit: u64,
    enforce_address_space: bool,
    namespaces: NamespaceMode,
    readonly_paths: Vec<PathBuf>,
    path_env: String,
}

#[derive(Debug, Clone)]
pub struct ProcessSandboxManager {
    settings: Settings,
}

impl ProcessSandboxManager {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            settings: Settings {
                wall_time_grace: Duration::from_millis(config.wall_time_grace_ms),
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                stdout_limit: config.stdout_limit_bytes,
                stderr_limit: config.stderr_limit_bytes,
                file_size_limit: config.file_size_limit_bytes,
                enforce_address_space: config.enforce_address_space,
                namespaces: config.namespaces,
                readonly_paths: config.readonly_paths.clone(),
                path_env: config.path_env.clone(),
            },
        }
    }

    /// Whether a step can be confined on this host: runs a trivial command
    /// through the full namespace and pivot sequence.
    pub fn confinement_available(&self) -> bool {
        let Ok(workspace) = tempfile::tempdir() else {
            return false;
        };
        let Ok(jail) = Jail::prepare(
            NamespaceMode::Required,
            &self.settings.readonly_paths,
            workspace.path(),
        ) else {
            return false;
        };
        let plan = jail.plan();

        let mut command = Command::new("/bin/sh");
        command
            .args(["-c", "exit 0"])
            .env_clear()
            .env("PATH", &self.settings.path_env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        unsafe {
            command.pre_exec(move || plan.enter());
        }
        match command.status() {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(error = %e, "Confinement check could not spawn");
                false
            }
        }
    }
}

#[async_trait]
impl SandboxManager for ProcessSandboxManager {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionResult, SandboxError> {
        let settings = self.settings.clone();
        let cwd = request.workspace.path().to_path_buf();
        let argv = request.argv.to_vec();
        let stdin = request.stdin.to_vec();
        let limits = request.limits.clone();

        tokio::task::spawn_blocking(move || run_blocking(&settings, &cwd, &argv, stdin, &limits))
            .await
            .map_err(|e| SandboxError::Unknown(format!("sandbox monitor task failed: {e}")))?
    }
}

/// Limits applied in the child between `fork` and `exec`.
#[derive(Debug, Clone, Copy)]
struct ChildLimits {
    cpu_seconds: u64,
    file_size: u64,
    address_space: Option<u64>,
}

impl ChildLimits {
    fn new(settings: &Settings, limits: &ResourceLimits) -> Self {
        // One extra second so the wall-clock deadline normally fires first.
        let cpu_seconds = limits.time_limit.as_secs_f64().ceil() as u64 + 1;
        Self {
            cpu_seconds,
            file_size: settings.file_size_limit,
            address_space: settings
                .enforce_address_space
                .then(|| limits.memory_limit_kb.saturating_mul(1024)),
        }
    }

    /// Runs in the forked child: only async-signal-safe calls are allowed.
    fn apply(&self) -> io::Result<()> {
        let cpu = rlimit(self.cpu_seconds, self.cpu_seconds + 1);
        check(unsafe { libc::setrlimit(libc::RLIMIT_CPU, &cpu) })?;
        let core = rlimit(0, 0);
        check(unsafe { libc::setrlimit(libc::RLIMIT_CORE, &core) })?;
        let fsize = rlimit(self.file_size, self.file_size);
        check(unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, &fsize) })?;
        if let Some(bytes) = self.address_space {
            let address_space = rlimit(bytes, bytes);
            check(unsafe { libc::setrlimit(libc::RLIMIT_AS, &address_space) })?;
        }
        Ok(())
    }
}

fn rlimit(soft: u64, hard: u64) -> libc::rlimit {
    libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Raw exit information from `wait4`.
struct Reaped {
    status: libc::c_int,
    usage: libc::rusage,
}

fn run_blocking(
    settings: &Settings,
    cwd: &Path,
    argv: &[String],
    stdin: Vec<u8>,
    limits: &ResourceLimits,
) -> Result<ExecutionResult, SandboxError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| SandboxError::Execution("empty command line".into()))?;

    // Held until the step is over; the skeleton is removed on drop.
    let jail = match settings.namespaces {
        NamespaceMode::Disabled => None,
        mode => Some(Jail::prepare(mode, &settings.readonly_paths, cwd)?),
    };
    let mount_plan: Option<MountPlan> = jail.as_ref().map(Jail::plan);
    // Relative programs such as `./main` resolve against the final cwd, which
    // is the jail's workdir once confined.
    let home = match &jail {
        Some(_) => Path::new(JAIL_WORKDIR),
        None => cwd,
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .env("PATH", &settings.path_env)
        .env("HOME", home)
        .env("TMPDIR", home)
        .env("LANG", "C.UTF-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let child_limits = ChildLimits::new(settings, limits);
    unsafe {
        command.pre_exec(move || {
            child_limits.apply()?;
            match &mount_plan {
                Some(plan) => plan.enter(),
                None => Ok(()),
            }
        });
    }

    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id() as libc::pid_t;
    debug!(pid, program = %program, confined = jail.is_some(), "Spawned sandboxed process");

    let stdin_pipe = child.stdin.take();
    let stdin_thread = thread::spawn(move || {
        if let Some(mut pipe) = stdin_pipe {
            // The program may exit without reading its input.
            let _ = pipe.write_all(&stdin);
        }
    });
    let stdout_rx = child
        .stdout
        .take()
        .map(|pipe| spawn_reader(pipe, settings.stdout_limit));
    let stderr_rx = child
        .stderr
        .take()
        .map(|pipe| spawn_reader(pipe, settings.stderr_limit));

    let monitored = monitor(pid, settings, limits, start);
    // Descendants may still be alive even though the leader has exited.
    kill_group(pid);
    let wall_time = start.elapsed();
    let (reaped, forced, sampled_peak_kb) = monitored?;

    let _ = stdin_thread.join();
    let (stdout, stdout_truncated) = collect_output(stdout_rx);
    let (stderr, stderr_truncated) = collect_output(stderr_rx);

    drop(jail);

    let cpu_time = timeval(reaped.usage.ru_utime) + timeval(reaped.usage.ru_stime);
    // ru_maxrss is reported in kilobytes on Linux.
    let peak_kb = sampled_peak_kb.max(reaped.usage.ru_maxrss.max(0) as u64);
    let exit_code = libc::WIFEXITED(reaped.status).then(|| libc::WEXITSTATUS(reaped.status));
    let signal = libc::WIFSIGNALED(reaped.status).then(|| libc::WTERMSIG(reaped.status));

    let (kind, message) = classify(
        forced,
        exit_code,
        signal,
        cpu_time,
        peak_kb,
        limits,
    );

    debug!(
        pid,
        kind = ?kind,
        exit_code = ?exit_code,
        signal = ?signal,
        cpu_ms = cpu_time.as_millis() as u64,
        wall_ms = wall_time.as_millis() as u64,
        peak_kb,
        "Sandboxed process finished"
    );

    Ok(ExecutionResult {
        kind,
        exit_code,
        signal,
        cpu_time,
        wall_time,
        memory_kb: (peak_kb > 0).then_some(peak_kb),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        stdout_truncated,
        stderr_truncated,
        message,
    })
}

/// Poll until the leader is reaped, killing the group on deadline or memory.
fn monitor(
    pid: libc::pid_t,
    settings: &Settings,
    limits: &ResourceLimits,
    start: Instant,
) -> Result<(Reaped, Option<CompletionKind>, u64), SandboxError> {
    let deadline = limits.time_limit + settings.wall_time_grace;
    let page_kb = page_size_kb();
    let mut forced = None;
    let mut peak_kb = 0u64;
    let mut last_group_sample: Option<Instant> = None;

    loop {
        if let Some(reaped) = wait_nohang(pid)? {
            return Ok((reaped, forced, peak_kb));
        }

        if forced.is_none() {
            if let Some(rss) = read_peak_rss_kb(pid) {
                peak_kb = peak_kb.max(rss);
            }
            if last_group_sample.is_none_or(|at| at.elapsed() >= GROUP_SAMPLE_INTERVAL) {
                peak_kb = peak_kb.max(group_rss_kb(pid, page_kb));
                last_group_sample = Some(Instant::now());
            }
            if peak_kb > limits.memory_limit_kb {
                kill_group(pid);
                forced = Some(CompletionKind::Killed);
            } else if start.elapsed() >= deadline {
                kill_group(pid);
                forced = Some(CompletionKind::TimedOut);
            }
        }

        thread::sleep(settings.poll_interval);
    }
}

fn classify(
    forced: Option<CompletionKind>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    cpu_time: Duration,
    peak_kb: u64,
    limits: &ResourceLimits,
) -> (CompletionKind, String) {
    match forced {
        Some(CompletionKind::TimedOut) => {
            return (CompletionKind::TimedOut, "wall time limit exceeded".into());
        }
        Some(CompletionKind::Killed) => {
            return (CompletionKind::Killed, "memory limit exceeded".into());
        }
        _ => {}
    }

    if signal == Some(libc::SIGXCPU) || cpu_time > limits.time_limit {
        return (CompletionKind::TimedOut, "cpu time limit exceeded".into());
    }
    if peak_kb > limits.memory_limit_kb {
        return (CompletionKind::Killed, "memory limit exceeded".into());
    }
    match (exit_code, signal) {
        (Some(0), _) => (CompletionKind::Completed, String::new()),
        (Some(code), _) => (CompletionKind::Crashed, format!("exited with code {code}")),
        (None, Some(sig)) => (CompletionKind::Crashed, format!("killed by signal {sig}")),
        (None, None) => (CompletionKind::Crashed, "terminated abnormally".into()),
    }
}

fn wait_nohang(pid: libc::pid_t) -> Result<Option<Reaped>, SandboxError> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let rc = unsafe { libc::wait4(pid, &mut status, libc::WNOHANG, &mut usage) };
        if rc == pid {
            return Ok(Some(Reaped { status, usage }));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(SandboxError::Execution(format!("wait4({pid}) failed: {err}")));
    }
}

fn kill_group(pgid: libc::pid_t) {
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill sandbox process group");
        }
    }
}

/// `VmHWM` of a live process, in kilobytes.
fn read_peak_rss_kb(pid: libc::pid_t) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
}

/// Current resident memory summed over every process in group `pgid`.
fn group_rss_kb(pgid: libc::pid_t, page_kb: u64) -> u64 {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let pages: u64 = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .filter(|&(group, _)| group == pgid)
        .map(|(_, rss_pages)| rss_pages)
        .sum();
    pages * page_kb
}

/// `(pgrp, rss in pages)` from a `/proc/<pid>/stat` line.
fn parse_stat(stat: &str) -> Option<(libc::pid_t, u64)> {
    // The command name may itself contain spaces and parentheses.
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let pgrp = fields.nth(2)?.parse().ok()?;
    let rss = fields.nth(18)?.parse().ok()?;
    Some((pgrp, rss))
}

fn page_size_kb() -> u64 {
    let bytes = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if bytes > 0 { bytes as u64 / 1024 } else { 4 }
}

fn timeval(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

type Captured = io::Result<(Vec<u8>, bool)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, cap: usize) -> mpsc::Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_capped(reader, cap));
    });
    rx
}

/// Read everything, keeping at most `cap` bytes. Returns whether output was cut.
fn read_capped<R: Read>(mut reader: R, cap: usize) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut truncated = false;
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let room = cap.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((buf, truncated))
}

fn collect_output(rx: Option<mpsc::Receiver<Captured>>) -> (Vec<u8>, bool) {
    let Some(rx) = rx else {
        return (Vec::new(), false);
    };
    match rx.recv_timeout(PIPE_DRAIN_TIMEOUT) {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read sandbox output");
            (Vec::new(), true)
        }
        // An escaped descendant still holds the pipe open.
        Err(_) => (Vec::new(), true),
    }
}
