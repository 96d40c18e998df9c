use std::any::Any;
use std::sync::{Arc, Mutex};

use common::judge_job::JudgeJob;
use common::judge_result::{JudgeResult, JudgeSystemErrorInfo};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::judge::{Judge, WORKER_PANIC};
use crate::models::queue::JobQueue;
use crate::models::store::{StoreError, SubmissionStore};

/// Fixed set of tokio tasks pulling jobs from a shared queue.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(
        worker_id: &str,
        size: usize,
        queue: Arc<JobQueue>,
        judge: Arc<Judge>,
        store: Arc<dyn SubmissionStore>,
    ) -> Self {
        let handles = (0..size.max(1))
            .map(|index| {
                let name = format!("{worker_id}-{index}");
                tokio::spawn(run_worker(
                    name,
                    queue.clone(),
                    judge.clone(),
                    store.clone(),
                ))
            })
            .collect();

        info!(worker_id, size, "Worker pool started");
        Self {
            queue,
            handles: Mutex::new(handles),
        }
    }

    /// Close the queue, let workers drain it, then wait for them.
    pub async fn shutdown(&self) {
        self.queue.close();
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    name: String,
    queue: Arc<JobQueue>,
    judge: Arc<Judge>,
    store: Arc<dyn SubmissionStore>,
) {
    info!(worker = %name, "Judge worker started");
    while let Some(job) = queue.next().await {
        let submission_id = job.submission_id;
        process_job(job, &judge, store.as_ref()).await;
        queue.complete(submission_id);
    }
    info!(worker = %name, "Judge worker stopped");
}

async fn process_job(job: JudgeJob, judge: &Arc<Judge>, store: &dyn SubmissionStore) {
    let submission_id = job.submission_id;
    let job_id = job.job_id.clone();

    info!(
        submission_id,
        job_id = %job_id,
        test_cases = job.test_cases.len(),
        "Processing judge job"
    );

    match store.mark_running(submission_id).await {
        Ok(()) => {}
        Err(StoreError::Backend(e)) => {
            warn!(submission_id, error = %e, "Failed to mark submission running");
        }
        Err(e) => {
            warn!(submission_id, error = %e, "Skipping job");
            return;
        }
    }

    // Judged in its own task so a panic cannot take the worker down.
    let task = {
        let judge = judge.clone();
        tokio::spawn(async move { judge.judge(&job).await })
    };
    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            let message = if e.is_panic() {
                format!("judge task panicked: {}", panic_message(e.into_panic()))
            } else {
                format!("judge task was cancelled: {e}")
            };
            error!(submission_id, job_id = %job_id, %message, "Judging crashed");
            JudgeResult::system_error(
                job_id.clone(),
                submission_id,
                JudgeSystemErrorInfo::new(WORKER_PANIC, message),
            )
        }
    };

    match store.record_result(&result).await {
        Ok(true) => info!(
            submission_id,
            job_id = %job_id,
            status = %result.status,
            verdict = ?result.verdict,
            time_used_ms = ?result.time_used_ms,
            "Recorded judge result"
        ),
        Ok(false) => warn!(
            submission_id,
            job_id = %job_id,
            "Submission already final, result dropped"
        ),
        Err(e) => error!(
            submission_id,
            job_id = %job_id,
            error = %e,
            "Failed to record judge result"
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
