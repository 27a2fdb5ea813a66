mod error;
mod task;

pub use error::{ConcatenationError, ConcatenationResult};
pub use task::{ConcatenationTask, TaskStatus, derive_candidate_path, derive_variable_key};
