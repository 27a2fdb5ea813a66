use tracing::{error, info, warn};

use crate::concatenation::TaskResult;
use crate::concatenation::coordinator::ConcatenationOptions;
use crate::concatenation::guard::delete_originals;
use crate::execution::MergeExecutor;
use crate::models::{ConcatenationError, ConcatenationResult, TaskStatus};
use crate::persistence::TaskRegistry;

/// Process every task of one variable partition, strictly in sequence.
///
/// Per task: skip if COMPLETE, mark STARTED, merge or move, mark
/// COMPLETE/FAILED, then (for multi-input successes) run the deletion guard.
/// A `MergeFailed` becomes that task's result and processing continues with
/// the next task; guard refusals and registry inconsistencies abort the
/// partition.
pub async fn run_partition<R>(
    registry: R,
    variable: String,
    options: ConcatenationOptions,
) -> ConcatenationResult<Vec<TaskResult>>
where
    R: TaskRegistry + Clone + Send + Sync + 'static,
{
    let tasks = {
        let variable_key = variable.clone();
        with_registry(&registry, &variable, move |registry| {
            registry.tasks_for_variable(&variable_key)
        })
        .await?
    };
    info!(%variable, tasks = tasks.len(), "task runner started");

    let executor = MergeExecutor::new(options.tool.clone(), options.dummy_run);
    let mut results = Vec::new();

    for (task_number, task) in tasks.into_iter().enumerate() {
        let output_file = task.output_file.clone();
        info!(
            task_number,
            output_file = %output_file.display(),
            "processing task"
        );

        if task.input_files.is_empty() {
            info!(output_file = %output_file.display(), "no input files to process; skipping");
            continue;
        }

        match task.status {
            TaskStatus::Complete => {
                info!(
                    output_file = %output_file.display(),
                    "skipping already completed task"
                );
                continue;
            }
            TaskStatus::Started => {
                if options.retry_started {
                    warn!(
                        output_file = %output_file.display(),
                        started_at = ?task.start_timestamp,
                        "task already STARTED, presumably from an interrupted run; \
                         restarting merge from scratch"
                    );
                } else {
                    warn!(
                        output_file = %output_file.display(),
                        started_at = ?task.start_timestamp,
                        "task already STARTED and retries are disabled; manual intervention required"
                    );
                    results.push(Err(ConcatenationError::InvalidTask(format!(
                        "task for \"{}\" is STARTED from a previous run and retry_started is off",
                        output_file.display()
                    ))));
                    continue;
                }
            }
            TaskStatus::NotStarted | TaskStatus::Failed => {}
        }

        executor.prepare_output_directory(&output_file).await?;

        if !options.dummy_run {
            let output = output_file.clone();
            with_registry(&registry, &variable, move |registry| {
                registry.mark_started(&output)
            })
            .await?;
        }

        let outcome = executor
            .concatenate(&task.input_files, &task.output_file, &task.candidate_file)
            .await;

        let (status, result): (TaskStatus, TaskResult) = match outcome {
            Ok(outcome) => (TaskStatus::Complete, Ok(outcome)),
            Err(merge_error @ ConcatenationError::MergeFailed { .. }) => {
                error!(
                    output_file = %output_file.display(),
                    error = %merge_error,
                    "concatenation failed"
                );
                (TaskStatus::Failed, Err(merge_error))
            }
            // Anything other than a merge-tool failure (e.g. the commit
            // rename itself failing) leaves state we cannot account for.
            Err(fatal) => return Err(fatal),
        };

        if !options.dummy_run {
            let output = output_file.clone();
            with_registry(&registry, &variable, move |registry| {
                registry.mark_finished(&output, status)
            })
            .await?;
        }
        info!(
            output_file = %output_file.display(),
            status = status.as_str(),
            "reported task status"
        );

        // A single-input move already relocated its source, so there is
        // nothing left to delete for that case.
        if status == TaskStatus::Complete
            && !options.dummy_run
            && options.delete_source
            && task.input_files.len() > 1
        {
            let output = output_file.clone();
            with_registry(&registry, &variable, move |registry| {
                delete_originals(registry, &output)
            })
            .await?;
        }

        results.push(result);
    }

    Ok(results)
}

/// Registry calls are blocking (they open and use a SQLite connection), so
/// they run on the blocking pool, each on the worker's own cloned handle.
async fn with_registry<R, T, F>(
    registry: &R,
    variable: &str,
    operation: F,
) -> ConcatenationResult<T>
where
    R: TaskRegistry + Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&R) -> ConcatenationResult<T> + Send + 'static,
{
    let registry = registry.clone();
    tokio::task::spawn_blocking(move || operation(&registry))
        .await
        .map_err(|join_error| ConcatenationError::WorkerCrash {
            variable: variable.to_string(),
            message: format!("blocking registry call failed: {join_error}"),
        })?
}
