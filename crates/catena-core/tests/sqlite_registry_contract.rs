use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use catena_core::models::{ConcatenationError, ConcatenationTask, TaskStatus};
use catena_core::persistence::TaskRegistry;
use catena_core::sqlite::SqliteRegistry;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("catena-{test_name}-{nanos}.db"))
}

fn open_registry(test_name: &str) -> SqliteRegistry {
    let registry = SqliteRegistry::new(test_db_path(test_name), Duration::from_secs(5));
    registry
        .migrate_to_latest()
        .expect("schema migration should succeed");
    registry
}

fn yearly_task(variable_name: &str, table: &str, years: std::ops::Range<u32>) -> ConcatenationTask {
    let inputs: Vec<PathBuf> = years
        .clone()
        .map(|year| {
            PathBuf::from(format!(
                "/staging/{variable_name}_{table}_exp_r1_gn_{year}01-{year}12.nc"
            ))
        })
        .collect();
    let output = format!(
        "/output/{table}/{variable_name}/{variable_name}_{table}_exp_r1_gn_{}01-{}12.nc",
        years.start,
        years.end - 1
    );
    ConcatenationTask::new(output, inputs).expect("valid task")
}

#[test]
fn migration_is_idempotent_and_versioned() {
    let registry = open_registry("migrations");
    assert_eq!(registry.current_version().unwrap(), 1);
    registry
        .migrate_to_latest()
        .expect("re-applying migrations should be a no-op");
    assert_eq!(registry.current_version().unwrap(), 1);
}

#[test]
fn operations_fail_before_schema_is_applied() {
    let registry = SqliteRegistry::new(test_db_path("no-schema"), Duration::from_secs(5));
    let error = registry.list_variables(TaskStatus::Complete).unwrap_err();
    assert!(matches!(error, ConcatenationError::Storage { .. }));
}

#[test]
fn inserted_tasks_round_trip() {
    let registry = open_registry("round-trip");
    let task = yearly_task("tas", "Amon", 1850..1860);
    registry.insert_tasks(&[task.clone()]).unwrap();

    let fetched = registry.tasks_for_variable("Amon/tas").unwrap();
    assert_eq!(fetched, vec![task.clone()]);

    // Chronological input order is load-bearing and must survive storage.
    assert_eq!(fetched[0].input_files, task.input_files);

    let by_key = registry.read_task(&task.output_file).unwrap();
    assert_eq!(by_key, Some(task));

    assert_eq!(
        registry.read_task(PathBuf::from("/no/such/file.nc").as_path()).unwrap(),
        None
    );
}

#[test]
fn list_variables_excludes_status_and_counts_tasks() {
    let registry = open_registry("list-variables");
    let tas_early = yearly_task("tas", "Amon", 1850..1860);
    let tas_late = yearly_task("tas", "Amon", 1860..1870);
    let pr = yearly_task("pr", "day", 1850..1856);
    registry
        .insert_tasks(&[tas_early.clone(), tas_late.clone(), pr.clone()])
        .unwrap();

    let pending = registry.list_variables(TaskStatus::Complete).unwrap();
    assert_eq!(
        pending,
        vec![("Amon/tas".to_string(), 2), ("day/pr".to_string(), 1)]
    );

    registry.mark_started(&tas_early.output_file).unwrap();
    registry
        .mark_finished(&tas_early.output_file, TaskStatus::Complete)
        .unwrap();

    let pending = registry.list_variables(TaskStatus::Complete).unwrap();
    assert_eq!(
        pending,
        vec![("Amon/tas".to_string(), 1), ("day/pr".to_string(), 1)]
    );
}

#[test]
fn mark_started_sets_status_and_timestamp() {
    let registry = open_registry("mark-started");
    let task = yearly_task("tas", "Amon", 1850..1852);
    registry.insert_tasks(&[task.clone()]).unwrap();

    registry.mark_started(&task.output_file).unwrap();

    let stored = registry.read_task(&task.output_file).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Started);
    assert!(stored.start_timestamp.is_some());
    assert_eq!(stored.complete_timestamp, None);
}

#[test]
fn mark_started_for_unknown_output_is_a_consistency_error() {
    let registry = open_registry("mark-started-missing");
    let error = registry
        .mark_started(PathBuf::from("/no/such/output.nc").as_path())
        .unwrap_err();
    assert!(matches!(error, ConcatenationError::RegistryConsistency(_)));
}

#[test]
fn mark_finished_records_terminal_status() {
    let registry = open_registry("mark-finished");
    let task = yearly_task("pr", "day", 1850..1853);
    registry.insert_tasks(&[task.clone()]).unwrap();
    registry.mark_started(&task.output_file).unwrap();

    registry
        .mark_finished(&task.output_file, TaskStatus::Failed)
        .unwrap();

    let stored = registry.read_task(&task.output_file).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.complete_timestamp.is_some());
}

#[test]
fn mark_finished_rejects_non_terminal_statuses() {
    let registry = open_registry("mark-finished-non-terminal");
    let task = yearly_task("pr", "day", 1850..1853);
    registry.insert_tasks(&[task.clone()]).unwrap();
    registry.mark_started(&task.output_file).unwrap();

    for status in [TaskStatus::NotStarted, TaskStatus::Started] {
        let error = registry
            .mark_finished(&task.output_file, status)
            .unwrap_err();
        assert!(matches!(error, ConcatenationError::InvalidTask(_)));
    }

    // The rejected calls must not have touched the row.
    let stored = registry.read_task(&task.output_file).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Started);
    assert_eq!(stored.complete_timestamp, None);
}

#[test]
fn mutations_are_visible_to_a_separate_handle() {
    let db_path = test_db_path("durability");
    let writer = SqliteRegistry::new(&db_path, Duration::from_secs(5));
    writer.migrate_to_latest().unwrap();

    let task = yearly_task("tas", "Amon", 1850..1853);
    writer.insert_tasks(&[task.clone()]).unwrap();
    writer.mark_started(&task.output_file).unwrap();

    // A second handle opens its own connection, as each worker does.
    let reader = SqliteRegistry::new(&db_path, Duration::from_secs(5));
    let stored = reader.read_task(&task.output_file).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Started);
}

#[test]
fn duplicate_output_file_insert_is_rejected() {
    let registry = open_registry("duplicate-insert");
    let task = yearly_task("tas", "Amon", 1850..1852);
    registry.insert_tasks(&[task.clone()]).unwrap();

    let error = registry.insert_tasks(&[task]).unwrap_err();
    assert!(matches!(error, ConcatenationError::Storage { .. }));
}
