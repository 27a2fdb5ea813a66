use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, Row, params};

use crate::models::{ConcatenationError, ConcatenationTask, TaskStatus};
use crate::persistence::{RegistryResult, TaskRegistry};
use crate::sqlite::schema::{current_schema_version, migrations};

const MIGRATIONS_TABLE: &str = "catena_schema_migrations";

/// Default lock-wait timeout for registry connections, matching the
/// behaviour expected of a store shared by several workers: a blocked row
/// update surfaces as an error after this long rather than hanging.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(300);

/// SQLite-backed task registry. The handle only holds the database path;
/// every operation opens its own short-lived connection, so cloning one of
/// these per worker gives each worker its own connection as required.
#[derive(Clone, Debug)]
pub struct SqliteRegistry {
    database_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteRegistry {
    pub fn new(database_path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            database_path: database_path.into(),
            busy_timeout,
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn current_version(&self) -> RegistryResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    pub fn migrate_to_latest(&self) -> RegistryResult<()> {
        self.with_connection("migrate_to_latest", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;
            for migration in migrations() {
                if migration.version <= current_version {
                    continue;
                }
                let transaction = connection.transaction()?;
                transaction.execute_batch(migration.up_sql)?;
                transaction.execute(
                    &format!(
                        "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
                         VALUES (?1, ?2, strftime('%s', 'now'))"
                    ),
                    (migration.version, migration.name),
                )?;
                transaction.commit()?;
            }
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> RegistryResult<T> {
        let mut connection =
            open_connection(&self.database_path, self.busy_timeout).map_err(|source| {
                ConcatenationError::Storage { operation, source }
            })?;
        body(&mut connection).map_err(|source| ConcatenationError::Storage { operation, source })
    }
}

impl TaskRegistry for SqliteRegistry {
    fn list_variables(
        &self,
        exclude_status: TaskStatus,
    ) -> RegistryResult<Vec<(String, usize)>> {
        self.with_connection("list_variables", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT variable, COUNT(1)
FROM concatenation_tasks
WHERE status != ?1
GROUP BY variable
ORDER BY variable
",
            )?;
            let rows = statement.query_map([exclude_status.as_str()], |row| {
                let variable: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((variable, count as usize))
            })?;
            rows.collect()
        })
    }

    fn tasks_for_variable(&self, variable: &str) -> RegistryResult<Vec<ConcatenationTask>> {
        self.with_connection("tasks_for_variable", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT output_file, variable, input_files, candidate_file,
       start_timestamp, complete_timestamp, status
FROM concatenation_tasks
WHERE variable = ?1
ORDER BY output_file
",
            )?;
            let rows = statement.query_map([variable], task_from_row)?;
            rows.collect()
        })
    }

    fn read_task(&self, output_file: &Path) -> RegistryResult<Option<ConcatenationTask>> {
        self.with_connection("read_task", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT output_file, variable, input_files, candidate_file,
       start_timestamp, complete_timestamp, status
FROM concatenation_tasks
WHERE output_file = ?1
",
            )?;
            let mut rows = statement.query(params![path_to_text(output_file)?])?;
            match rows.next()? {
                Some(row) => Ok(Some(task_from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    fn mark_started(&self, output_file: &Path) -> RegistryResult<()> {
        let updated = self.with_connection("mark_started", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
UPDATE concatenation_tasks
SET start_timestamp = strftime('%s', 'now'), status = ?2
WHERE output_file = ?1
",
                params![path_to_text(output_file)?, TaskStatus::Started.as_str()],
            )
        })?;
        expect_single_row("mark_started", output_file, updated)
    }

    fn mark_finished(&self, output_file: &Path, status: TaskStatus) -> RegistryResult<()> {
        if !status.is_terminal() {
            return Err(ConcatenationError::InvalidTask(format!(
                "cannot finish \"{}\" with non-terminal status {}",
                output_file.display(),
                status.as_str()
            )));
        }
        let updated = self.with_connection("mark_finished", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
UPDATE concatenation_tasks
SET complete_timestamp = strftime('%s', 'now'), status = ?2
WHERE output_file = ?1
",
                params![path_to_text(output_file)?, status.as_str()],
            )
        })?;
        expect_single_row("mark_finished", output_file, updated)
    }

    fn insert_tasks(&self, tasks: &[ConcatenationTask]) -> RegistryResult<()> {
        self.with_connection("insert_tasks", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            {
                let mut statement = transaction.prepare(
                    "
INSERT INTO concatenation_tasks
    (output_file, variable, input_files, candidate_file, status)
VALUES (?1, ?2, ?3, ?4, ?5)
",
                )?;
                for task in tasks {
                    statement.execute(params![
                        path_to_text(&task.output_file)?,
                        task.variable,
                        join_input_files(&task.input_files)?,
                        path_to_text(&task.candidate_file)?,
                        task.status.as_str(),
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
    }
}

/// The registry's single-row updates are only trustworthy while
/// `output_file` stays unique; any other row count means that invariant is
/// broken and the run must stop.
fn expect_single_row(
    operation: &'static str,
    output_file: &Path,
    updated: usize,
) -> RegistryResult<()> {
    if updated == 1 {
        return Ok(());
    }
    Err(ConcatenationError::RegistryConsistency(format!(
        "{operation} for \"{}\" affected {updated} rows, expected exactly 1",
        output_file.display()
    )))
}

fn open_connection(database_path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(busy_timeout)?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
",
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(
            "registry schema is not initialized; apply migrations before task operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ConcatenationTask> {
    let output_file: String = row.get(0)?;
    let variable: String = row.get(1)?;
    let input_files_raw: String = row.get(2)?;
    let candidate_file: String = row.get(3)?;
    let start_timestamp: Option<i64> = row.get(4)?;
    let complete_timestamp: Option<i64> = row.get(5)?;
    let status_raw: String = row.get(6)?;

    Ok(ConcatenationTask {
        output_file: PathBuf::from(output_file),
        variable,
        input_files: input_files_raw
            .split_whitespace()
            .map(PathBuf::from)
            .collect(),
        candidate_file: PathBuf::from(candidate_file),
        status: parse_status(&status_raw)?,
        start_timestamp: start_timestamp.map(from_unix_seconds).transpose()?,
        complete_timestamp: complete_timestamp.map(from_unix_seconds).transpose()?,
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    TaskStatus::parse(raw).ok_or_else(|| {
        storage_error_sqlite(&format!(
            "unknown task status '{raw}' found in persisted registry record"
        ))
    })
}

/// Input paths are persisted space-separated in chronological merge order,
/// so a path containing whitespace would corrupt the list on read-back.
fn join_input_files(input_files: &[PathBuf]) -> rusqlite::Result<String> {
    let mut rendered = Vec::with_capacity(input_files.len());
    for input in input_files {
        let text = input
            .to_str()
            .ok_or_else(|| storage_error_sqlite("input file path is not valid UTF-8"))?;
        if text.chars().any(char::is_whitespace) {
            return Err(storage_error_sqlite(&format!(
                "input file path \"{text}\" contains whitespace and cannot be persisted"
            )));
        }
        rendered.push(text);
    }
    Ok(rendered.join(" "))
}

fn path_to_text(path: &Path) -> rusqlite::Result<&str> {
    path.to_str()
        .ok_or_else(|| storage_error_sqlite("path is not valid UTF-8"))
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}
