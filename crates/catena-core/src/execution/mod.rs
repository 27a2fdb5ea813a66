use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tracing::info;

use crate::models::{ConcatenationError, ConcatenationResult};

/// Command contract for the external merge tool:
/// `<tool> <in_1> ... <in_N> -o <candidate_file>`, exit 0 on success.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MergeCommand {
    pub tool: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub candidate: PathBuf,
}

impl MergeCommand {
    pub fn new(tool: PathBuf, inputs: Vec<PathBuf>, candidate: PathBuf) -> Self {
        Self {
            tool,
            inputs,
            candidate,
        }
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.tool.to_string_lossy().into_owned()];
        parts.extend(
            self.inputs
                .iter()
                .map(|input| input.to_string_lossy().into_owned()),
        );
        parts.push("-o".to_string());
        parts.push(self.candidate.to_string_lossy().into_owned());
        parts.join(" ")
    }

    fn to_tokio(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.tool);
        command.args(&self.inputs);
        command.arg("-o").arg(&self.candidate);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }
}

/// Successful per-task result: the populated output path plus the command
/// line that produced it (or the move message for the single-input path).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub output_file: PathBuf,
    pub detail: String,
}

/// Runs merges (or the single-file move fast path) and performs the atomic
/// commit of the candidate file onto the output path.
#[derive(Clone, Debug)]
pub struct MergeExecutor {
    tool: PathBuf,
    dummy_run: bool,
}

impl MergeExecutor {
    pub fn new(tool: impl Into<PathBuf>, dummy_run: bool) -> Self {
        Self {
            tool: tool.into(),
            dummy_run,
        }
    }

    /// Create the output file's parent directory if it does not exist yet.
    /// A dry run touches nothing.
    pub async fn prepare_output_directory(&self, output_file: &Path) -> ConcatenationResult<()> {
        if self.dummy_run {
            info!("dummy run: no preparatory work for concatenation");
            return Ok(());
        }
        let Some(output_dir) = output_file.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        if output_dir.is_dir() {
            return Ok(());
        }
        info!(directory = %output_dir.display(), "creating output directory");
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| ConcatenationError::Io {
                path: output_dir.to_path_buf(),
                source,
            })
    }

    /// Consolidate `input_files` into `output_file`. A single input is moved
    /// into place without invoking the merge tool; two or more inputs are
    /// merged into `candidate_file`, which is then renamed onto
    /// `output_file` so no observer ever sees a partially written output.
    pub async fn concatenate(
        &self,
        input_files: &[PathBuf],
        output_file: &Path,
        candidate_file: &Path,
    ) -> ConcatenationResult<TaskOutcome> {
        if let [single_input] = input_files {
            return self.move_single_file(single_input, output_file).await;
        }

        let command = MergeCommand::new(
            self.tool.clone(),
            input_files.to_vec(),
            candidate_file.to_path_buf(),
        );
        let command_line = command.command_line();

        if self.dummy_run {
            info!(command = %command_line, "dummy command");
            return Ok(TaskOutcome {
                output_file: output_file.to_path_buf(),
                detail: command_line,
            });
        }

        info!(command = %command_line, "running merge command");
        let output =
            command
                .to_tokio()
                .output()
                .await
                .map_err(|error| ConcatenationError::MergeFailed {
                    command: command_line.clone(),
                    exit_code: None,
                    reason: format!("failed to spawn merge tool: {error}"),
                })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match output.status.code() {
                Some(code) => format!("exit code {code}: {}", stderr.trim()),
                None => format!("terminated by signal: {}", stderr.trim()),
            };
            return Err(ConcatenationError::MergeFailed {
                command: command_line,
                exit_code: output.status.code(),
                reason,
            });
        }

        tokio::fs::rename(candidate_file, output_file)
            .await
            .map_err(|source| ConcatenationError::Io {
                path: output_file.to_path_buf(),
                source,
            })?;

        Ok(TaskOutcome {
            output_file: output_file.to_path_buf(),
            detail: command_line,
        })
    }

    async fn move_single_file(
        &self,
        input_file: &Path,
        output_file: &Path,
    ) -> ConcatenationResult<TaskOutcome> {
        let detail = format!(
            "Moving \"{}\" to \"{}\"",
            input_file.display(),
            output_file.display()
        );

        if self.dummy_run {
            info!(command = %detail, "dummy command");
        } else {
            info!("{detail}");
            tokio::fs::rename(input_file, output_file)
                .await
                .map_err(|source| ConcatenationError::Io {
                    path: output_file.to_path_buf(),
                    source,
                })?;
        }

        Ok(TaskOutcome {
            output_file: output_file.to_path_buf(),
            detail,
        })
    }
}
