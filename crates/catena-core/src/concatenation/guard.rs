use std::path::Path;

use tracing::{error, info};

use crate::models::{ConcatenationError, ConcatenationResult, TaskStatus};
use crate::persistence::TaskRegistry;

/// Delete the source inputs of a task, but only after independently
/// confirming both that the registry records it COMPLETE and that the output
/// file really exists on disk. Refusal is a `GuardCheckFailed` error; a
/// failed unlink is logged and re-raised rather than tolerated, since silent
/// partial cleanup risks double-processing or disk exhaustion on re-runs.
pub fn delete_originals<R: TaskRegistry>(
    registry: &R,
    output_file: &Path,
) -> ConcatenationResult<()> {
    info!(output_file = %output_file.display(), "confirming completion before deleting inputs");

    let task = registry.read_task(output_file)?.ok_or_else(|| {
        let reason = "no registry row found for output file".to_string();
        error!(output_file = %output_file.display(), "{reason}");
        ConcatenationError::GuardCheckFailed {
            output_file: output_file.to_path_buf(),
            reason,
        }
    })?;

    if task.status != TaskStatus::Complete {
        let reason = format!(
            "status is {}, but must be {} prior to deletion",
            task.status.as_str(),
            TaskStatus::Complete.as_str()
        );
        error!(output_file = %output_file.display(), "{reason}");
        return Err(ConcatenationError::GuardCheckFailed {
            output_file: output_file.to_path_buf(),
            reason,
        });
    }

    if !output_file.exists() {
        let reason = "output file not found on disk".to_string();
        error!(output_file = %output_file.display(), "{reason}");
        return Err(ConcatenationError::GuardCheckFailed {
            output_file: output_file.to_path_buf(),
            reason,
        });
    }

    info!(
        count = task.input_files.len(),
        "deleting source input files"
    );
    for input_file in &task.input_files {
        std::fs::remove_file(input_file).map_err(|source| {
            error!(
                input_file = %input_file.display(),
                error = %source,
                "deletion of input file failed"
            );
            ConcatenationError::Io {
                path: input_file.clone(),
                source,
            }
        })?;
    }

    info!("deletions complete");
    Ok(())
}
