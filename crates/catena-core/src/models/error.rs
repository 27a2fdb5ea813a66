use std::path::PathBuf;

use thiserror::Error;

pub type ConcatenationResult<T> = Result<T, ConcatenationError>;

#[derive(Debug, Error)]
pub enum ConcatenationError {
    /// The external merge tool exited non-zero or could not be spawned.
    /// Captured per task; never aborts sibling tasks on its own.
    #[error("merge command `{command}` failed ({reason})")]
    MergeFailed {
        command: String,
        exit_code: Option<i32>,
        reason: String,
    },

    /// A deletion precondition did not hold after a reported success.
    /// Fatal: signals a reported success without a real, registered output.
    #[error("refusing to delete inputs for \"{output_file}\": {reason}")]
    GuardCheckFailed { output_file: PathBuf, reason: String },

    /// A single-row registry update affected zero or more than one row,
    /// meaning the output-file key uniqueness invariant is broken.
    #[error("registry consistency violation: {0}")]
    RegistryConsistency(String),

    /// A worker failed outside normal per-task handling (panic, pool
    /// management failure). The whole run is untrusted once this occurs.
    #[error("concatenation worker for \"{variable}\" crashed: {message}")]
    WorkerCrash { variable: String, message: String },

    #[error("registry operation '{operation}' failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("filesystem operation on \"{path}\" failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid concatenation task: {0}")]
    InvalidTask(String),

    /// Aggregate raised by the coordinator when any per-task result is an
    /// error. The full result list is logged before this is returned.
    #[error("Concatenation errors found: {failed} of {total} tasks failed")]
    TasksFailed { failed: usize, total: usize },
}
