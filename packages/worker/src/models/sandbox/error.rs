use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}
