use rusqlite::Connection;
use std::path::Path;

/// Tables holding a direct foreign key to `runtime_environment.id` in a
/// `runtime_environment_id` column.
pub const RUNTIME_FK_TABLES: [&str; 6] = [
    "exercise_runtime_environment",
    "exercise_environment_config",
    "exercise_limits",
    "assignment_runtime_environment",
    "assignment_disabled_runtime_environments",
    "solution",
];

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS \"group\"(
            id TEXT PRIMARY KEY,
            archived_at TEXT,
            deleted_at TEXT
        );
        CREATE TABLE IF NOT EXISTS runtime_environment(
            id TEXT PRIMARY KEY,
            long_name TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS hardware_group(
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL DEFAULT ''
        );",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS exercise_config(
            id TEXT PRIMARY KEY,
            config TEXT
        );
        CREATE TABLE IF NOT EXISTS exercise_score_config(
            id TEXT PRIMARY KEY,
            calculator TEXT NOT NULL,
            config TEXT
        );
        CREATE TABLE IF NOT EXISTS exercise(
            id TEXT PRIMARY KEY,
            author_id TEXT,
            forked_from_id TEXT,
            exercise_config_id TEXT,
            score_config_id TEXT,
            difficulty TEXT NOT NULL DEFAULT '',
            configuration_type TEXT NOT NULL DEFAULT '',
            solution_files_limit INTEGER,
            solution_size_limit INTEGER,
            merge_judge_logs INTEGER NOT NULL DEFAULT 0,
            is_broken INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY(author_id) REFERENCES user(id),
            FOREIGN KEY(exercise_config_id) REFERENCES exercise_config(id),
            FOREIGN KEY(score_config_id) REFERENCES exercise_score_config(id)
        );
        CREATE INDEX IF NOT EXISTS idx_exercise_forked_from ON exercise(forked_from_id);
        CREATE TABLE IF NOT EXISTS exercise_group(
            exercise_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, group_id)
        );
        CREATE TABLE IF NOT EXISTS exercise_tag(
            id TEXT PRIMARY KEY,
            exercise_id TEXT NOT NULL,
            name TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_exercise_tag_exercise ON exercise_tag(exercise_id);",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS localized_exercise(
            id TEXT PRIMARY KEY,
            locale TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            external_assignment_link TEXT
        );
        CREATE TABLE IF NOT EXISTS exercise_localized_exercise(
            exercise_id TEXT NOT NULL,
            localized_exercise_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, localized_exercise_id)
        );
        CREATE TABLE IF NOT EXISTS exercise_runtime_environment(
            exercise_id TEXT NOT NULL,
            runtime_environment_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, runtime_environment_id)
        );
        CREATE TABLE IF NOT EXISTS exercise_hardware_group(
            exercise_id TEXT NOT NULL,
            hardware_group_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, hardware_group_id)
        );
        CREATE TABLE IF NOT EXISTS exercise_environment_config(
            id TEXT PRIMARY KEY,
            runtime_environment_id TEXT NOT NULL,
            variables_table TEXT
        );
        CREATE TABLE IF NOT EXISTS exercise_exercise_environment_config(
            exercise_id TEXT NOT NULL,
            exercise_environment_config_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, exercise_environment_config_id)
        );
        CREATE TABLE IF NOT EXISTS exercise_limits(
            id TEXT PRIMARY KEY,
            runtime_environment_id TEXT NOT NULL,
            hardware_group_id TEXT,
            limits TEXT
        );
        CREATE TABLE IF NOT EXISTS exercise_exercise_limits(
            exercise_id TEXT NOT NULL,
            exercise_limits_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, exercise_limits_id)
        );
        CREATE TABLE IF NOT EXISTS exercise_test(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS exercise_exercise_test(
            exercise_id TEXT NOT NULL,
            exercise_test_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, exercise_test_id)
        );
        CREATE TABLE IF NOT EXISTS uploaded_file(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            hash_name TEXT
        );
        CREATE TABLE IF NOT EXISTS exercise_supplementary_exercise_file(
            exercise_id TEXT NOT NULL,
            supplementary_exercise_file_id TEXT NOT NULL,
            PRIMARY KEY(exercise_id, supplementary_exercise_file_id)
        );",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS pipeline(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            deleted_at TEXT
        );
        CREATE TABLE IF NOT EXISTS pipeline_parameter(
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            name TEXT NOT NULL,
            discriminator TEXT NOT NULL,
            boolean_value INTEGER,
            string_value TEXT,
            FOREIGN KEY(pipeline_id) REFERENCES pipeline(id)
        );
        CREATE INDEX IF NOT EXISTS idx_pipeline_parameter_pipeline ON pipeline_parameter(pipeline_id);
        CREATE TABLE IF NOT EXISTS pipeline_runtime_environment(
            pipeline_id TEXT NOT NULL,
            runtime_environment_id TEXT NOT NULL,
            PRIMARY KEY(pipeline_id, runtime_environment_id)
        );",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS assignment(
            id TEXT PRIMARY KEY,
            exercise_id TEXT,
            deleted_at TEXT
        );
        CREATE TABLE IF NOT EXISTS assignment_runtime_environment(
            assignment_id TEXT NOT NULL,
            runtime_environment_id TEXT NOT NULL,
            PRIMARY KEY(assignment_id, runtime_environment_id)
        );
        CREATE TABLE IF NOT EXISTS assignment_disabled_runtime_environments(
            assignment_id TEXT NOT NULL,
            runtime_environment_id TEXT NOT NULL,
            PRIMARY KEY(assignment_id, runtime_environment_id)
        );
        CREATE TABLE IF NOT EXISTS solution(
            id TEXT PRIMARY KEY,
            runtime_environment_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_solution_runtime ON solution(runtime_environment_id);",
    )?;

    Ok(())
}
