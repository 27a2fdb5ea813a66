use std::path::Path;

use crate::models::{ConcatenationError, ConcatenationTask, TaskStatus};

pub type RegistryResult<T> = Result<T, ConcatenationError>;

/// Durable store of concatenation tasks keyed by output path. The registry
/// is the sole cross-restart source of truth: every mutation must be durable
/// before the call returns, so implementations may not cache writes.
pub trait TaskRegistry: Send + Sync {
    /// Distinct `(variable_key, task_count)` pairs for tasks whose status is
    /// not `exclude_status`.
    fn list_variables(&self, exclude_status: TaskStatus)
    -> RegistryResult<Vec<(String, usize)>>;

    fn tasks_for_variable(&self, variable: &str) -> RegistryResult<Vec<ConcatenationTask>>;

    fn read_task(&self, output_file: &Path) -> RegistryResult<Option<ConcatenationTask>>;

    /// Set STARTED plus the start timestamp. Must affect exactly one row;
    /// zero or more than one is a `RegistryConsistency` error.
    fn mark_started(&self, output_file: &Path) -> RegistryResult<()>;

    /// Set a terminal status plus the completion timestamp. `status` must be
    /// COMPLETE or FAILED; anything else is rejected. Must affect exactly
    /// one row, as for `mark_started`.
    fn mark_finished(&self, output_file: &Path, status: TaskStatus) -> RegistryResult<()>;

    /// Seed rows before a run. Used by the external setup collaborator and
    /// by tests; never called during task processing.
    fn insert_tasks(&self, tasks: &[ConcatenationTask]) -> RegistryResult<()>;
}
