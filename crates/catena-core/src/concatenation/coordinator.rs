use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::concatenation::TaskResult;
use crate::concatenation::runner::run_partition;
use crate::models::{ConcatenationError, ConcatenationResult, TaskStatus};
use crate::persistence::TaskRegistry;
use crate::sqlite::SqliteRegistry;
use crate::sqlite::registry::DEFAULT_STORE_TIMEOUT;

/// Explicit per-invocation settings for a batch run. There is no ambient
/// configuration: callers construct one of these and pass it down.
#[derive(Clone, Debug)]
pub struct ConcatenationOptions {
    /// External merge tool, invoked as `<tool> <inputs...> -o <candidate>`.
    pub tool: PathBuf,
    /// Build and log command lines without executing anything or mutating
    /// the registry or the filesystem.
    pub dummy_run: bool,
    /// Run the deletion guard over the inputs of completed multi-input tasks.
    pub delete_source: bool,
    /// Lock-wait timeout applied to every registry connection.
    pub store_timeout: Duration,
    /// Policy for tasks found STARTED at dispatch (a prior run was
    /// interrupted mid-merge): true redoes the merge from scratch, which is
    /// safe because inputs persist until explicit deletion; false records a
    /// per-task failure asking for manual intervention.
    pub retry_started: bool,
}

impl Default for ConcatenationOptions {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("ncrcat"),
            dummy_run: false,
            delete_source: true,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            retry_started: true,
        }
    }
}

/// Run every pending concatenation task in `task_db`, partitioned by
/// variable key, across a pool of `nworkers` parallel workers.
///
/// Each partition is handled by one worker at a time, strictly sequentially
/// within the partition, and every worker opens its own registry handle.
/// Returns the collected per-task results, or the first fatal error; if any
/// per-task result is an error the full list is logged and a single
/// aggregate `TasksFailed` error is returned.
pub async fn batch_concatenation(
    task_db: &Path,
    nworkers: usize,
    options: ConcatenationOptions,
) -> ConcatenationResult<Vec<TaskResult>> {
    info!(task_db = %task_db.display(), nworkers, "connecting to task registry");
    let registry = SqliteRegistry::new(task_db, options.store_timeout);

    info!("retrieving list of tasks");
    let work_to_do = {
        let registry = registry.clone();
        tokio::task::spawn_blocking(move || registry.list_variables(TaskStatus::Complete))
            .await
            .map_err(|join_error| ConcatenationError::WorkerCrash {
                variable: "task enumeration".to_string(),
                message: format!("registry enumeration failed: {join_error}"),
            })??
    };
    info!(partitions = work_to_do.len(), "found work to do");
    for (variable, task_count) in &work_to_do {
        info!(%variable, task_count, "pending partition");
    }

    let mut results: Vec<TaskResult> = Vec::new();

    if nworkers > 1 {
        let semaphore = Arc::new(Semaphore::new(nworkers));
        let mut pool: JoinSet<ConcatenationResult<Vec<TaskResult>>> = JoinSet::new();
        let mut partitions = HashMap::new();

        for (variable, task_count) in work_to_do {
            info!(%variable, task_count, "adding concatenation partition to pool");
            let semaphore = semaphore.clone();
            let options = options.clone();
            let task_db = task_db.to_path_buf();
            let partition_variable = variable.clone();
            let handle = pool.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|error| {
                    ConcatenationError::WorkerCrash {
                        variable: partition_variable.clone(),
                        message: format!("worker pool closed unexpectedly: {error}"),
                    }
                })?;
                // Every worker gets its own registry handle; cross-worker
                // safety comes from the store's row-level locking, never
                // from sharing a connection.
                let registry = SqliteRegistry::new(&task_db, options.store_timeout);
                run_partition(registry, partition_variable, options).await
            });
            partitions.insert(handle.id(), variable);
        }

        while let Some(joined) = pool.join_next_with_id().await {
            match joined {
                Ok((id, Ok(partition_results))) => {
                    partitions.remove(&id);
                    results.extend(partition_results);
                }
                Ok((id, Err(fatal))) => {
                    let variable = partitions.remove(&id).unwrap_or_default();
                    error!(%variable, error = %fatal, "concatenation partition failed");
                    let abandoned: Vec<String> = partitions.into_values().collect();
                    report_abandoned_run(&results, &abandoned);
                    return Err(fatal);
                }
                Err(join_error) => {
                    let variable = partitions.remove(&join_error.id()).unwrap_or_default();
                    error!(%variable, error = %join_error, "concatenation worker crashed");
                    let abandoned: Vec<String> = partitions.into_values().collect();
                    report_abandoned_run(&results, &abandoned);
                    return Err(ConcatenationError::WorkerCrash {
                        variable,
                        message: join_error.to_string(),
                    });
                }
            }
        }
    } else {
        let mut queue = work_to_do.into_iter();
        while let Some((variable, task_count)) = queue.next() {
            info!(%variable, task_count, "performing concatenation partition");
            match run_partition(registry.clone(), variable.clone(), options.clone()).await {
                Ok(partition_results) => results.extend(partition_results),
                Err(fatal) => {
                    error!(%variable, error = %fatal, "concatenation partition failed");
                    let abandoned: Vec<String> = queue.map(|(pending, _)| pending).collect();
                    report_abandoned_run(&results, &abandoned);
                    return Err(fatal);
                }
            }
        }
    }

    let failed = results.iter().filter(|result| result.is_err()).count();
    if failed > 0 {
        log_task_results(&results);
        error!(failed, total = results.len(), "Concatenation errors found");
        return Err(ConcatenationError::TasksFailed {
            failed,
            total: results.len(),
        });
    }

    info!(total = results.len(), "concatenations complete");
    Ok(results)
}

/// A worker-level failure makes the whole run untrusted. Everything that
/// already finished is logged for diagnosis, along with the partitions that
/// never got to run, before the error surfaces to the caller.
fn report_abandoned_run(results: &[TaskResult], abandoned: &[String]) {
    if !results.is_empty() {
        warn!(
            completed = results.len(),
            "task results collected before the failure; recheck them before trusting any"
        );
        log_task_results(results);
    }
    for variable in abandoned {
        warn!(%variable, "partition abandoned before completion");
    }
}

#[derive(Serialize)]
struct TaskReport<'a> {
    result: &'static str,
    output_file: Option<&'a Path>,
    detail: String,
}

/// Log the full per-task result list (as one JSON document) before the
/// aggregate error is raised, so failed runs stay diagnosable.
fn log_task_results(results: &[TaskResult]) {
    let reports: Vec<TaskReport<'_>> = results
        .iter()
        .map(|result| match result {
            Ok(outcome) => TaskReport {
                result: "ok",
                output_file: Some(&outcome.output_file),
                detail: outcome.detail.clone(),
            },
            Err(task_error) => TaskReport {
                result: "error",
                output_file: None,
                detail: task_error.to_string(),
            },
        })
        .collect();

    match serde_json::to_string(&reports) {
        Ok(rendered) => info!(task_results = %rendered, "per-task results"),
        Err(render_error) => error!(error = %render_error, "could not render task results"),
    }
}
