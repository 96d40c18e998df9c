pub mod evaluator;
pub mod judge;
pub mod language;
pub mod queue;
pub mod sandbox;
pub mod store;
pub mod worker;

pub use judge::{CustomRunOutcome, Judge, JudgeError};
pub use language::{Language, Toolchain, ToolchainRegistry};
pub use queue::JobQueue;
pub use store::{
    FileProblemRepository, InMemoryProblemRepository, InMemorySubmissionStore, ProblemRepository,
    SubmissionStore,
};
pub use worker::WorkerPool;
