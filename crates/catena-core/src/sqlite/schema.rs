#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_concatenation_tasks",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS concatenation_tasks (
    output_file TEXT PRIMARY KEY,
    variable TEXT NOT NULL,
    input_files TEXT NOT NULL,
    candidate_file TEXT NOT NULL,
    start_timestamp INTEGER,
    complete_timestamp INTEGER,
    status TEXT NOT NULL DEFAULT 'NOT_STARTED'
);

CREATE INDEX IF NOT EXISTS idx_concatenation_tasks_variable_status
    ON concatenation_tasks (variable, status);
"#,
};

const MIGRATIONS: [SqliteMigration; 1] = [MIGRATION_0001];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
