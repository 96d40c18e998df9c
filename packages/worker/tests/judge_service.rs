//! End-to-end judging through `JudgeService` with the process sandbox.
//!
//! Scenarios needing a compiler or interpreter skip when it is not installed.

use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Problem, SubmissionStatus, TestCase, Verdict};
use serial_test::serial;
use worker::config::NamespaceMode;
use worker::models::{InMemoryProblemRepository, InMemorySubmissionStore, SubmissionStore};
use worker::{
    CustomRunOutcome, JudgeService, PollOutcome, StatusPoller, SubmitError, SubmitOutcome,
    SubmitRequest, WorkerAppConfig,
};

const ECHO_PROBLEM: i32 = 1;
const SUM_PROBLEM: i32 = 2;
const EMPTY_PROBLEM: i32 = 3;

fn installed(program: &str) -> bool {
    let found = Command::new(program).arg("--version").output().is_ok();
    if !found {
        eprintln!("{program} not installed, skipping");
    }
    found
}

fn test_case(id: i32, input: &str, expected_output: &str) -> TestCase {
    TestCase {
        id,
        order: id,
        input: input.into(),
        expected_output: expected_output.into(),
        hidden: id > 1,
    }
}

fn problems() -> InMemoryProblemRepository {
    [
        Problem {
            id: ECHO_PROBLEM,
            short_code: "ECHO".into(),
            name: "Echo".into(),
            time_limit_ms: 1000,
            memory_limit_kb: 256 * 1024,
            test_cases: vec![
                test_case(1, "hello\n", "hello\n"),
                test_case(2, "judge\n", "judge"),
            ],
        },
        Problem {
            id: SUM_PROBLEM,
            short_code: "SUM".into(),
            name: "A plus B".into(),
            time_limit_ms: 1000,
            memory_limit_kb: 256 * 1024,
            test_cases: vec![test_case(1, "1 2\n", "3\n"), test_case(2, "40 2\n", "42\n")],
        },
        Problem {
            id: EMPTY_PROBLEM,
            short_code: "EMPTY".into(),
            name: "No tests".into(),
            time_limit_ms: 1000,
            memory_limit_kb: 65536,
            test_cases: vec![],
        },
    ]
    .into_iter()
    .collect()
}

struct Harness {
    service: JudgeService,
    store: Arc<InMemorySubmissionStore>,
}

fn start() -> Harness {
    let mut config = WorkerAppConfig::default();
    config.worker.pool_size = 2;
    config.sandbox.namespaces = NamespaceMode::Disabled;
    config.sandbox.wall_time_grace_ms = 500;

    let store = Arc::new(InMemorySubmissionStore::new());
    let service = JudgeService::new(&config, Arc::new(problems()), store.clone()).unwrap();
    Harness { service, store }
}

/// Default sandbox settings, which confine every step. `None` when the host
/// cannot create the namespaces.
fn start_confined() -> Option<Harness> {
    let mut config = WorkerAppConfig::default();
    config.worker.pool_size = 2;
    config.sandbox.wall_time_grace_ms = 500;

    let store = Arc::new(InMemorySubmissionStore::new());
    match JudgeService::new(&config, Arc::new(problems()), store.clone()) {
        Ok(service) => Some(Harness { service, store }),
        Err(e) => {
            eprintln!("confinement unavailable ({e}), skipping");
            None
        }
    }
}

fn host_marker(tag: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("judge-{tag}-{}-{nanos}", std::process::id()))
}

fn request(id: i32, problem_id: i32, language: &str, code: &str) -> SubmitRequest {
    SubmitRequest {
        submission_id: id,
        user_id: 7,
        problem_id,
        language: language.into(),
        code: code.into(),
    }
}

async fn judge_status(judge: &Harness, request: SubmitRequest) -> SubmissionStatus {
    let id = request.submission_id;
    assert_eq!(
        judge.service.submit(request).await.unwrap(),
        SubmitOutcome::Enqueued
    );
    let poller = StatusPoller::new(Duration::from_millis(50), 600);
    match poller.wait(&judge.service, id).await.unwrap() {
        PollOutcome::Finished(_) => judge.store.status(id).await.unwrap().unwrap(),
        PollOutcome::GaveUp(last) => panic!("submission {id} never finished: {last:?}"),
    }
}

#[tokio::test]
#[serial]
async fn zero_test_cases_are_rejected_up_front() {
    let judge = start();
    let err = judge
        .service
        .submit(request(1, EMPTY_PROBLEM, "py", "print(1)"))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::NoTestCases(EMPTY_PROBLEM)));
    assert_eq!(judge.service.get_status(1).await.unwrap(), None);
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn python_echo_is_accepted() {
    if !installed("python3") {
        return;
    }
    let judge = start();
    let status = judge_status(&judge, request(1, ECHO_PROBLEM, "py", "print(input())")).await;
    assert_eq!(status, SubmissionStatus::Accepted);

    let view = judge.service.get_status(1).await.unwrap().unwrap();
    assert!(!view.pending);
    assert_eq!(view.code, "AC");
    // Reading again changes nothing.
    assert_eq!(judge.service.get_status(1).await.unwrap().unwrap(), view);

    let record = judge.service.get_result(1).await.unwrap().unwrap();
    assert_eq!(record.result.unwrap().test_case_results.len(), 2);
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn python_wrong_answer_and_runtime_error() {
    if !installed("python3") {
        return;
    }
    let judge = start();
    let wrong = judge_status(&judge, request(1, ECHO_PROBLEM, "py", "print('nope')")).await;
    assert_eq!(wrong, SubmissionStatus::WrongAnswer);

    let crash = judge_status(&judge, request(2, ECHO_PROBLEM, "py", "raise SystemExit(3)")).await;
    assert_eq!(crash, SubmissionStatus::RuntimeError);

    let record = judge.service.get_result(2).await.unwrap().unwrap();
    let result = record.result.unwrap();
    assert_eq!(result.test_case_results.len(), 1);
    assert_eq!(result.test_case_results[0].exit_code, Some(3));
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn infinite_loop_times_out_within_the_grace() {
    if !installed("python3") {
        return;
    }
    let judge = start();
    let started = Instant::now();
    let status = judge_status(&judge, request(1, ECHO_PROBLEM, "py", "while True:\n    pass\n")).await;
    assert_eq!(status, SubmissionStatus::TimeLimitExceeded);
    // One test case at 1 s + 0.5 s grace, plus polling slack.
    assert!(started.elapsed() < Duration::from_secs(5));

    let view = judge.service.get_status(1).await.unwrap().unwrap();
    assert_eq!(view.verdict, Some(Verdict::TimeLimitExceeded));
    assert_eq!(view.code, "TLE");
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn cpp_syntax_error_is_a_compilation_error() {
    if !installed("g++") {
        return;
    }
    let judge = start();
    let status = judge_status(
        &judge,
        request(1, SUM_PROBLEM, "cpp", "int main() { return 0 }"),
    )
    .await;
    assert_eq!(status, SubmissionStatus::CompilationError);

    let result = judge
        .service
        .get_result(1)
        .await
        .unwrap()
        .unwrap()
        .result
        .unwrap();
    assert!(result.test_case_results.is_empty());
    assert!(!result.compile_output.unwrap().is_empty());
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn cpp_solution_is_accepted() {
    if !installed("g++") {
        return;
    }
    let judge = start();
    let code = "#include <iostream>\nint main() { long a, b; std::cin >> a >> b; std::cout << a + b << std::endl; }\n";
    let status = judge_status(&judge, request(1, SUM_PROBLEM, "cpp", code)).await;
    assert_eq!(status, SubmissionStatus::Accepted);
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn resubmitting_a_judged_submission_is_a_no_op() {
    if !installed("python3") {
        return;
    }
    let judge = start();
    let status = judge_status(&judge, request(1, ECHO_PROBLEM, "py", "print(input())")).await;
    assert_eq!(status, SubmissionStatus::Accepted);

    let again = judge
        .service
        .submit(request(1, ECHO_PROBLEM, "py", "print('changed')"))
        .await
        .unwrap();
    assert_eq!(again, SubmitOutcome::AlreadyJudged);
    assert_eq!(
        judge.store.status(1).await.unwrap(),
        Some(SubmissionStatus::Accepted)
    );
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn playground_runs_against_custom_input() {
    if !installed("python3") {
        return;
    }
    let judge = start();
    let outcome = judge
        .service
        .run_custom("py", "print(int(input()) * 2)", "21\n")
        .await
        .unwrap();
    match outcome {
        CustomRunOutcome::Executed(result) => {
            assert!(result.is_completed());
            assert_eq!(result.stdout.trim(), "42");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(judge.store.is_empty());
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn confined_submission_cannot_write_to_host_tmp() {
    if !installed("python3") {
        return;
    }
    let Some(judge) = start_confined() else {
        return;
    };
    let marker = host_marker("submission");
    let code = format!(
        "open('{}', 'w').write('escaped')\nprint(input())\n",
        marker.display()
    );
    let status = judge_status(&judge, request(1, ECHO_PROBLEM, "py", &code)).await;

    assert_eq!(status, SubmissionStatus::RuntimeError);
    assert!(!marker.exists());
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn confined_submission_cannot_reach_the_network() {
    if !installed("python3") {
        return;
    }
    let Some(judge) = start_confined() else {
        return;
    };
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let code = format!(
        "import socket\nsocket.create_connection(('127.0.0.1', {port}), timeout=1)\nprint(input())\n"
    );
    let status = judge_status(&judge, request(1, ECHO_PROBLEM, "py", &code)).await;

    assert_eq!(status, SubmissionStatus::RuntimeError);
    judge.service.shutdown().await;
}

#[tokio::test]
#[serial]
async fn confined_cpp_compiles_and_is_accepted() {
    if !installed("g++") {
        return;
    }
    let Some(judge) = start_confined() else {
        return;
    };
    let code = "#include <iostream>\nint main() { long a, b; std::cin >> a >> b; std::cout << a + b << std::endl; }\n";
    let status = judge_status(&judge, request(1, SUM_PROBLEM, "cpp", code)).await;
    assert_eq!(status, SubmissionStatus::Accepted);
    judge.service.shutdown().await;
}
