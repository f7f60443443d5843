// ALLOCBENCH ERROR TAXONOMY
// PER-CONFIGURATION FAILURES ARE LOCAL: THE ORCHESTRATOR LOGS THEM AND MOVES ON.
// ONLY EmptyInput AND Interrupted ABORT A RUN.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("benchmark binary not found: {}", .0.display())]
    MissingBinary(PathBuf),

    #[error("malformed row ({fields} fields): {line}")]
    MalformedRow { fields: usize, line: String },

    #[error("{bin} exited with status {code:?}")]
    ChildFailed { bin: String, code: Option<i32> },

    #[error("{bin} timed out after {secs}s")]
    ChildTimedOut { bin: String, secs: u64 },

    #[error("interrupted by operator")]
    Interrupted,

    #[error("no benchmark binaries resolved")]
    EmptyInput,

    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BenchError {
    // PROCESS EXIT CODE FOR ERRORS THAT ABORT THE WHOLE RUN
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Interrupted => 130,
            _ => 1,
        }
    }
}

pub type BenchResult<T> = Result<T, BenchError>;
