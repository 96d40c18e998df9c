//! Client-side polling: fixed interval, bounded attempts.

use std::future::Future;
use std::time::Duration;

use common::SubmissionId;
use tracing::debug;

use crate::config::PollingConfig;
use crate::models::store::StoreError;
use crate::service::{JudgeService, StatusView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The submission reached a final state.
    Finished(StatusView),
    /// Attempts ran out. Holds the last status seen, if any.
    GaveUp(Option<StatusView>),
}

#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(Duration::from_secs(config.interval_secs), config.max_attempts)
    }

    /// Call `fetch` until it reports a final status or attempts run out.
    pub async fn poll<F, Fut>(&self, mut fetch: F) -> Result<PollOutcome, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<StatusView>, StoreError>>,
    {
        let mut last = None;
        for attempt in 1..=self.max_attempts {
            match fetch().await? {
                Some(view) if !view.pending => return Ok(PollOutcome::Finished(view)),
                seen => {
                    debug!(attempt, status = ?seen.as_ref().map(|v| &v.code), "Still pending");
                    last = seen;
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Ok(PollOutcome::GaveUp(last))
    }

    pub async fn wait(
        &self,
        service: &JudgeService,
        id: SubmissionId,
    ) -> Result<PollOutcome, StoreError> {
        self.poll(move || service.get_status(id)).await
    }
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}
