use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Worker pool configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Identifier for this judge instance, used in logs. Default: "judge-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Number of concurrent judge workers. Default: 4.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum number of queued jobs before submissions get `QueueFull`. Default: 64.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_worker_id() -> String {
    "judge-1".into()
}
fn default_pool_size() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Which sandbox implementation executes compile and run steps.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Local child process with rlimits, its own process group and namespaces.
    #[default]
    Process,
    /// The `isolate` sandbox.
    Isolate,
}

/// How the process backend confines a step.
///
/// Confinement means fresh user, mount and network namespaces and a private
/// root holding only the workspace and the read-only system paths.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceMode {
    /// No confinement. Steps see the host filesystem and network.
    Disabled,
    /// Confine when the kernel allows it, run unconfined otherwise.
    BestEffort,
    /// Refuse to start, or to run a step, without confinement.
    #[default]
    Required,
}

/// Sandbox configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: SandboxBackend,
    /// Parent directory for per-step workspaces. Default: system temp dir.
    #[serde(default)]
    pub work_root: Option<PathBuf>,
    /// Extra wall-clock time granted past the time limit. Default: 500 ms.
    #[serde(default = "default_wall_time_grace_ms")]
    pub wall_time_grace_ms: u64,
    /// Monitor poll interval for the process backend. Default: 10 ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Captured stdout cap. Default: 16 MiB.
    #[serde(default = "default_stdout_limit_bytes")]
    pub stdout_limit_bytes: usize,
    /// Captured stderr cap. Default: 64 KiB.
    #[serde(default = "default_stderr_limit_bytes")]
    pub stderr_limit_bytes: usize,
    /// Largest file a sandboxed process may write. Default: 64 MiB.
    #[serde(default = "default_file_size_limit_bytes")]
    pub file_size_limit_bytes: u64,
    /// Also cap the address space at the memory limit (breaks most JIT runtimes).
    #[serde(default)]
    pub enforce_address_space: bool,
    #[serde(default)]
    pub namespaces: NamespaceMode,
    /// Host directories mounted read-only into a confined step. Missing ones are skipped.
    #[serde(default = "default_readonly_paths")]
    pub readonly_paths: Vec<PathBuf>,
    /// `PATH` visible to sandboxed processes; nothing else is inherited.
    #[serde(default = "default_path_env")]
    pub path_env: String,
    /// Isolate executable path. Default: "isolate".
    #[serde(default = "default_isolate_bin")]
    pub isolate_bin: String,
    /// First isolate box id; box ids `first_box_id..first_box_id + pool_size` are used.
    #[serde(default)]
    pub first_box_id: u32,
    /// Process limit inside an isolate box. Default: 64.
    #[serde(default = "default_process_limit")]
    pub process_limit: u32,
}

fn default_wall_time_grace_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_stdout_limit_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_stderr_limit_bytes() -> usize {
    64 * 1024
}
fn default_file_size_limit_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_path_env() -> String {
    "/usr/local/bin:/usr/bin:/bin".into()
}
fn default_readonly_paths() -> Vec<PathBuf> {
    ["/usr", "/bin", "/lib", "/lib64", "/etc"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}
fn default_isolate_bin() -> String {
    "isolate".into()
}
fn default_process_limit() -> u32 {
    64
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            work_root: None,
            wall_time_grace_ms: default_wall_time_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stdout_limit_bytes: default_stdout_limit_bytes(),
            stderr_limit_bytes: default_stderr_limit_bytes(),
            file_size_limit_bytes: default_file_size_limit_bytes(),
            enforce_address_space: false,
            namespaces: NamespaceMode::default(),
            readonly_paths: default_readonly_paths(),
            path_env: default_path_env(),
            isolate_bin: default_isolate_bin(),
            first_box_id: 0,
            process_limit: default_process_limit(),
        }
    }
}

/// Limits that do not come from a problem.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Compile step time limit. Default: 10 s.
    #[serde(default = "default_compile_time_limit_ms")]
    pub compile_time_limit_ms: u32,
    /// Compile step memory limit. Default: 512 MiB.
    #[serde(default = "default_compile_memory_limit_kb")]
    pub compile_memory_limit_kb: u32,
    /// Time limit for custom runs. Default: 5 s.
    #[serde(default = "default_run_time_limit_ms")]
    pub default_time_limit_ms: u32,
    /// Memory limit for custom runs. Default: 256 MiB.
    #[serde(default = "default_run_memory_limit_kb")]
    pub default_memory_limit_kb: u32,
}

fn default_compile_time_limit_ms() -> u32 {
    10_000
}
fn default_compile_memory_limit_kb() -> u32 {
    512 * 1024
}
fn default_run_time_limit_ms() -> u32 {
    5_000
}
fn default_run_memory_limit_kb() -> u32 {
    256 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_time_limit_ms: default_compile_time_limit_ms(),
            compile_memory_limit_kb: default_compile_memory_limit_kb(),
            default_time_limit_ms: default_run_time_limit_ms(),
            default_memory_limit_kb: default_run_memory_limit_kb(),
        }
    }
}

/// Client polling cadence used by `StatusPoller`.
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Default: 3 s.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Default: 20.
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_secs() -> u64 {
    3
}
fn default_poll_max_attempts() -> u32 {
    20
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

/// Replacement command templates for one language tag.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ToolchainOverride {
    pub compile: Option<String>,
    pub run: Option<String>,
}

/// Judge application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    /// Keyed by language tag.
    #[serde(default)]
    pub toolchains: HashMap<String, ToolchainOverride>,
}

impl WorkerAppConfig {
    /// Load `config_path` (extension optional) layered under `JUDGE__*` variables.
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("worker.id", "judge-1")?
            .set_default("worker.pool_size", 4_i64)?
            .set_default("worker.queue_capacity", 64_i64)?
            .set_default("sandbox.backend", "process")?
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("JUDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = WorkerAppConfig::load_from("/nonexistent/judge-config").unwrap();
        assert_eq!(config.worker.pool_size, 4);
        assert_eq!(config.worker.queue_capacity, 64);
        assert_eq!(config.sandbox.backend, SandboxBackend::Process);
        assert_eq!(config.sandbox.namespaces, NamespaceMode::Required);
        assert!(config.sandbox.readonly_paths.contains(&PathBuf::from("/usr")));
        assert_eq!(config.limits.compile_time_limit_ms, 10_000);
        assert_eq!(config.polling.interval_secs, 3);
        assert_eq!(config.polling.max_attempts, 20);
        assert!(config.toolchains.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[worker]
pool_size = 2

[sandbox]
backend = "isolate"
namespaces = "best_effort"
readonly_paths = ["/usr", "/opt/jdk"]
wall_time_grace_ms = 250

[toolchains.cpp]
compile = "clang++ -O2 -o {{binary}} {{source}}"
"#
        )
        .unwrap();

        let config = WorkerAppConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.worker.pool_size, 2);
        assert_eq!(config.worker.id, "judge-1");
        assert_eq!(config.sandbox.backend, SandboxBackend::Isolate);
        assert_eq!(config.sandbox.namespaces, NamespaceMode::BestEffort);
        assert_eq!(
            config.sandbox.readonly_paths,
            [PathBuf::from("/usr"), PathBuf::from("/opt/jdk")]
        );
        assert_eq!(config.sandbox.wall_time_grace_ms, 250);
        assert_eq!(
            config.toolchains["cpp"].compile.as_deref(),
            Some("clang++ -O2 -o {binary} {source}")
        );
    }
}
