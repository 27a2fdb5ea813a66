use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::models::{ConcatenationError, ConcatenationResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskStatus {
    NotStarted,
    Started,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Started => "STARTED",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NOT_STARTED" => Some(TaskStatus::NotStarted),
            "STARTED" => Some(TaskStatus::Started),
            "COMPLETE" => Some(TaskStatus::Complete),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Whether this status may be recorded as the end of a task attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// One row of the concatenation registry: consolidate `input_files` (in
/// chronological order) into `output_file`, writing to `candidate_file`
/// first so the final path is only ever populated by an atomic rename.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConcatenationTask {
    pub output_file: PathBuf,
    pub variable: String,
    pub input_files: Vec<PathBuf>,
    pub candidate_file: PathBuf,
    pub status: TaskStatus,
    pub start_timestamp: Option<SystemTime>,
    pub complete_timestamp: Option<SystemTime>,
}

impl ConcatenationTask {
    /// Build a NOT_STARTED task for registry seeding, deriving the variable
    /// key from the output filename and the candidate path from the first
    /// input's directory.
    pub fn new(
        output_file: impl Into<PathBuf>,
        input_files: Vec<PathBuf>,
    ) -> ConcatenationResult<Self> {
        let output_file = output_file.into();
        let first_input = input_files.first().ok_or_else(|| {
            ConcatenationError::InvalidTask(format!(
                "task for \"{}\" has no input files",
                output_file.display()
            ))
        })?;
        let variable = derive_variable_key(&output_file)?;
        let candidate_file = derive_candidate_path(&output_file, first_input);
        Ok(Self {
            output_file,
            variable,
            input_files,
            candidate_file,
            status: TaskStatus::NotStarted,
            start_timestamp: None,
            complete_timestamp: None,
        })
    }
}

/// Grouping key for an output filename of the form
/// `<variable>_<table>_..._<dates>.<ext>`: the first two facets reversed and
/// joined with `/`, e.g. `tas_Amon_..._185001-185912.nc` -> `Amon/tas`.
pub fn derive_variable_key(output_file: &Path) -> ConcatenationResult<String> {
    let basename = output_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ConcatenationError::InvalidTask(format!(
                "output file \"{}\" has no usable filename",
                output_file.display()
            ))
        })?;
    let facets: Vec<&str> = basename.split('_').collect();
    if facets.len() < 3 {
        return Err(ConcatenationError::InvalidTask(format!(
            "cannot derive variable key from \"{basename}\": expected at least \
             <variable>_<table>_<dates> facets"
        )));
    }
    Ok(format!("{}/{}", facets[1], facets[0]))
}

/// Scratch path the merge tool writes to: a sibling of the first input named
/// `<output stem>_candidate<output extension>`. Keeping it next to the inputs
/// means a failed merge never leaves anything in the output directory, and
/// the final commit stays a same-filesystem rename.
pub fn derive_candidate_path(output_file: &Path, first_input: &Path) -> PathBuf {
    let stem = output_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = output_file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let directory = first_input.parent().unwrap_or_else(|| Path::new(""));
    directory.join(format!("{stem}_candidate{extension}"))
}
