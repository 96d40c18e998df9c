use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Short code shown to clients while no terminal state has been observed.
pub const PENDING_CODE: &str = "PE";
/// Short code for a submission the judge itself failed to evaluate.
pub const INTERNAL_ERROR_CODE: &str = "IE";

/// Terminal judgment of a submission, as attributed to the submitted code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompilationError,
}

impl Verdict {
    pub const ALL: &'static [Verdict] = &[
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
    ];

    /// Wire short code (`AC`, `WA`, `TLE`, `RE`, `CE`).
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::TimeLimitExceeded => "TLE",
            Self::RuntimeError => "RE",
            Self::CompilationError => "CE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::RuntimeError => "Runtime Error",
            Self::CompilationError => "Compilation Error",
        }
    }

    /// Rank used when several failure causes apply to a single outcome.
    ///
    /// `CompilationError > TimeLimitExceeded > RuntimeError > WrongAnswer > Accepted`.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::WrongAnswer => 1,
            Self::RuntimeError => 2,
            Self::TimeLimitExceeded => 3,
            Self::CompilationError => 4,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_code())
    }
}

/// Status of a submission during the judging lifecycle.
///
/// `Pending -> Running -> {Accepted | WrongAnswer | TimeLimitExceeded |
/// RuntimeError | CompilationError | JudgeFailed}`. Final states are never
/// left once reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum SubmissionStatus {
    /// Waiting to be picked up by a worker.
    #[default]
    Pending,
    /// Held by exactly one worker.
    Running,
    /// All test cases passed.
    Accepted,
    /// Output did not match expected output.
    WrongAnswer,
    /// Exceeded time limit.
    TimeLimitExceeded,
    /// Program crashed, exited with non-zero code or hit the memory ceiling.
    RuntimeError,
    /// Failed to compile.
    CompilationError,
    /// Internal judge error. Not attributed to the submitted code.
    JudgeFailed,
}

impl SubmissionStatus {
    /// Returns true if this is a final state (judging is complete).
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// The verdict carried by this status, if any.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Accepted => Some(Verdict::Accepted),
            Self::WrongAnswer => Some(Verdict::WrongAnswer),
            Self::TimeLimitExceeded => Some(Verdict::TimeLimitExceeded),
            Self::RuntimeError => Some(Verdict::RuntimeError),
            Self::CompilationError => Some(Verdict::CompilationError),
            Self::Pending | Self::Running | Self::JudgeFailed => None,
        }
    }

    /// Client-facing short code. Non-final states all report `PE`.
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Pending | Self::Running => PENDING_CODE,
            Self::JudgeFailed => INTERNAL_ERROR_CODE,
            other => other.verdict().map(|v| v.short_code()).unwrap_or(PENDING_CODE),
        }
    }

    /// Client-facing label. Internal failures are shown generically.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pending | Self::Running => "Pending Evaluation",
            Self::JudgeFailed => "Internal Error",
            other => other
                .verdict()
                .map(|v| v.display_name())
                .unwrap_or("Pending Evaluation"),
        }
    }

    /// All possible status values.
    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Pending,
        Self::Running,
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
        Self::JudgeFailed,
    ];

    /// Returns the string representation (PascalCase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "WrongAnswer",
            Self::TimeLimitExceeded => "TimeLimitExceeded",
            Self::RuntimeError => "RuntimeError",
            Self::CompilationError => "CompilationError",
            Self::JudgeFailed => "JudgeFailed",
        }
    }
}

impl From<Verdict> for SubmissionStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => Self::Accepted,
            Verdict::WrongAnswer => Self::WrongAnswer,
            Verdict::TimeLimitExceeded => Self::TimeLimitExceeded,
            Verdict::RuntimeError => Self::RuntimeError,
            Verdict::CompilationError => Self::CompilationError,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status '{invalid}'")]
pub struct ParseStatusError {
    invalid: String,
}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}
