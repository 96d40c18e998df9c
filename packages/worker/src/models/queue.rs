//! Bounded in-process job queue with per-submission deduplication.

use std::sync::Mutex;

use common::SubmissionId;
use common::judge_job::JudgeJob;
use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::mpsc::{self, OwnedPermit, error::TrySendError};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full")]
    Full,

    #[error("job queue is closed")]
    Closed,
}

/// Jobs flow through a bounded channel; `in_flight` holds every submission id
/// between `reserve` and `complete`, so a submission has at most one job.
#[derive(Debug)]
pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<JudgeJob>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<JudgeJob>>,
    in_flight: DashSet<SubmissionId>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            in_flight: DashSet::new(),
        }
    }

    /// Claim `id` and one channel slot.
    ///
    /// `Ok(None)` means the submission is already queued or being judged.
    /// On `Err` nothing has been claimed.
    pub fn reserve(&self, id: SubmissionId) -> Result<Option<QueueSlot<'_>>, QueueError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(QueueError::Closed)?;

        if !self.in_flight.insert(id) {
            return Ok(None);
        }
        match sender.try_reserve_owned() {
            Ok(permit) => Ok(Some(QueueSlot {
                queue: self,
                id,
                permit: Some(permit),
            })),
            Err(e) => {
                self.in_flight.remove(&id);
                Err(match e {
                    TrySendError::Full(_) => QueueError::Full,
                    TrySendError::Closed(_) => QueueError::Closed,
                })
            }
        }
    }

    /// Wait for the next job. `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<JudgeJob> {
        self.receiver.lock().await.recv().await
    }

    /// Release a submission id after its result has been written.
    pub fn complete(&self, id: SubmissionId) {
        self.in_flight.remove(&id);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop accepting jobs. Queued jobs are still handed out by `next`.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// A claimed submission id plus a reserved channel slot.
///
/// Dropping the slot without committing releases both.
#[derive(Debug)]
pub struct QueueSlot<'a> {
    queue: &'a JobQueue,
    id: SubmissionId,
    permit: Option<OwnedPermit<JudgeJob>>,
}

impl QueueSlot<'_> {
    /// Hand the job to the workers. Never blocks and never fails.
    pub fn commit(mut self, job: JudgeJob) {
        if let Some(permit) = self.permit.take() {
            permit.send(job);
        }
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if self.permit.is_some() {
            self.queue.in_flight.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(submission_id: SubmissionId) -> JudgeJob {
        JudgeJob {
            job_id: format!("job-{submission_id}"),
            submission_id,
            problem_id: 1,
            language: "py".into(),
            source: String::new(),
            time_limit_ms: 1000,
            memory_limit_kb: 65536,
            test_cases: vec![],
        }
    }

    #[tokio::test]
    async fn committed_job_is_delivered() {
        let queue = JobQueue::new(4);
        queue.reserve(1).unwrap().unwrap().commit(job(1));

        let received = queue.next().await.unwrap();
        assert_eq!(received.submission_id, 1);
        assert_eq!(queue.in_flight(), 1);

        queue.complete(1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn duplicate_reservation_is_a_no_op() {
        let queue = JobQueue::new(4);
        queue.reserve(1).unwrap().unwrap().commit(job(1));
        assert!(queue.reserve(1).unwrap().is_none());

        let _ = queue.next().await.unwrap();
        // Still in flight while being judged.
        assert!(queue.reserve(1).unwrap().is_none());
        queue.complete(1);
        assert!(queue.reserve(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn full_queue_rejects_without_claiming() {
        let queue = JobQueue::new(1);
        queue.reserve(1).unwrap().unwrap().commit(job(1));

        assert_eq!(queue.reserve(2).unwrap_err(), QueueError::Full);
        assert_eq!(queue.in_flight(), 1);

        let _ = queue.next().await.unwrap();
        assert!(queue.reserve(2).unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_slot_releases_the_id() {
        let queue = JobQueue::new(1);
        let slot = queue.reserve(5).unwrap().unwrap();
        assert_eq!(queue.in_flight(), 1);
        drop(slot);

        assert_eq!(queue.in_flight(), 0);
        queue.reserve(5).unwrap().unwrap().commit(job(5));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = JobQueue::new(4);
        queue.reserve(1).unwrap().unwrap().commit(job(1));
        queue.close();

        assert_eq!(queue.reserve(2).unwrap_err(), QueueError::Closed);
        assert_eq!(queue.next().await.unwrap().submission_id, 1);
        let end = tokio::time::timeout(Duration::from_secs(1), queue.next()).await;
        assert!(matches!(end, Ok(None)));
    }

    #[tokio::test]
    async fn close_wakes_an_idle_receiver() {
        let queue = std::sync::Arc::new(JobQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
    }
}
