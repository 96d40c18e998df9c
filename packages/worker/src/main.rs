use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use worker::models::{FileProblemRepository, InMemoryProblemRepository, InMemorySubmissionStore};
use worker::{
    CustomRunOutcome, JudgeService, PollOutcome, StatusPoller, SubmitOutcome, SubmitRequest,
    WorkerAppConfig,
};

#[derive(Debug, Parser)]
#[command(name = "judger", version, about = "Compile, run and judge submissions")]
struct Cli {
    /// Config file path without extension.
    #[arg(long, env = "JUDGE_CONFIG", default_value = "config/config")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Judge a source file against a problem and print the verdict.
    Judge {
        /// Directory holding `<id>.toml` problem files.
        #[arg(long)]
        problems: PathBuf,
        #[arg(long)]
        problem: i32,
        #[arg(long)]
        language: String,
        #[arg(long, default_value_t = 1)]
        submission_id: i32,
        /// Print the full judge record as JSON.
        #[arg(long)]
        json: bool,
        source: PathBuf,
    },
    /// Run a source file once against custom input.
    Run {
        #[arg(long)]
        language: String,
        /// File fed to stdin. Empty input when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
        source: PathBuf,
    },
    /// List supported languages.
    Languages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let config = WorkerAppConfig::load_from(&cli.config).context("Failed to load config")?;
    info!(
        worker_id = %config.worker.id,
        pool_size = config.worker.pool_size,
        backend = ?config.sandbox.backend,
        "Judge starting"
    );

    match cli.command {
        Command::Judge {
            problems,
            problem,
            language,
            submission_id,
            json,
            source,
        } => {
            let code = read_source(&source).await?;
            let service = JudgeService::new(
                &config,
                Arc::new(FileProblemRepository::new(problems)),
                Arc::new(InMemorySubmissionStore::new()),
            )
            .context("Failed to start judge")?;

            let outcome = service
                .submit(SubmitRequest {
                    submission_id,
                    user_id: 0,
                    problem_id: problem,
                    language,
                    code,
                })
                .await
                .context("Submission rejected")?;
            if outcome != SubmitOutcome::Enqueued {
                bail!("Submission {submission_id} was not enqueued: {outcome:?}");
            }

            let poller = StatusPoller::from_config(&config.polling);
            let polled = poller
                .wait(&service, submission_id)
                .await
                .context("Failed to read submission status")?;
            let record = service
                .get_result(submission_id)
                .await
                .context("Failed to read judge result")?;
            service.shutdown().await;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&record).context("Failed to encode result")?
                );
                return Ok(());
            }

            match polled {
                PollOutcome::Finished(view) => {
                    println!("{} {}", view.code, view.verdict_display);
                }
                PollOutcome::GaveUp(last) => {
                    let code = last.map(|v| v.code).unwrap_or_default();
                    bail!("Gave up waiting for submission {submission_id} (last status: {code})");
                }
            }

            if let Some(result) = record.and_then(|r| r.result) {
                if let Some(output) = &result.compile_output {
                    println!("{output}");
                }
                for test_case in &result.test_case_results {
                    println!(
                        "  #{} {} {} ms{}",
                        test_case.test_case_id,
                        test_case.verdict.short_code(),
                        test_case.time_used_ms,
                        test_case
                            .memory_used_kb
                            .map(|kb| format!(" {kb} kB"))
                            .unwrap_or_default()
                    );
                }
                if let Some(info) = &result.error_info {
                    eprintln!("{}: {}", info.code, info.message);
                }
            }
        }
        Command::Run {
            language,
            input,
            source,
        } => {
            let code = read_source(&source).await?;
            let input = match input {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => String::new(),
            };

            let service = JudgeService::new(
                &config,
                Arc::new(InMemoryProblemRepository::new()),
                Arc::new(InMemorySubmissionStore::new()),
            )
            .context("Failed to start judge")?;
            let outcome = service
                .run_custom(&language, &code, &input)
                .await
                .context("Custom run failed")?;
            service.shutdown().await;

            match outcome {
                CustomRunOutcome::CompilationError { output } => {
                    println!("CE Compilation Error");
                    println!("{output}");
                }
                CustomRunOutcome::Executed(result) => {
                    print!("{}", result.stdout);
                    eprint!("{}", result.stderr);
                    eprintln!(
                        "[{:?}] exit={:?} cpu={} ms wall={} ms",
                        result.kind,
                        result.exit_code,
                        result.cpu_time.as_millis(),
                        result.wall_time.as_millis()
                    );
                }
            }
        }
        Command::Languages => {
            let service = JudgeService::new(
                &config,
                Arc::new(InMemoryProblemRepository::new()),
                Arc::new(InMemorySubmissionStore::new()),
            )
            .context("Failed to start judge")?;
            for (tag, name) in service.languages() {
                println!("{tag:6} {name}");
            }
            service.shutdown().await;
        }
    }

    Ok(())
}

async fn read_source(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}
