pub mod coordinator;
pub mod guard;
pub mod runner;

pub use coordinator::{ConcatenationOptions, batch_concatenation};
pub use guard::delete_originals;
pub use runner::run_partition;

use crate::execution::TaskOutcome;
use crate::models::ConcatenationError;

/// Per-task result collected by the coordinator: a successful outcome, or a
/// retained `MergeFailed` error. The coordinator inspects the tag only.
pub type TaskResult = Result<TaskOutcome, ConcatenationError>;
