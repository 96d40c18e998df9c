pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod service;

pub use config::WorkerAppConfig;
pub use error::{Result, SubmitError, WorkerError};
pub use models::{CustomRunOutcome, WorkerPool};
pub use poller::{PollOutcome, StatusPoller};
pub use service::{JudgeService, StatusView, SubmitOutcome, SubmitRequest};
