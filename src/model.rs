use crate::error::DbopsResult;
use crate::store::RowQuery;
use rusqlite::Connection;
use std::collections::HashMap;

/// Sorted, de-duplicated list of ids (or tag names) attached to an exercise.
///
/// The joined form mirrors the comma-joined strings the store produces with
/// `GROUP_CONCAT`; comparing it is the cheap path every facet tries first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdList(Vec<String>);

impl IdList {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut v: Vec<String> = ids.into_iter().map(Into::into).collect();
        v.sort();
        v.dedup();
        Self(v)
    }

    pub fn joined(&self) -> String {
        self.0.join(",")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// A non-deleted exercise with all of its foreign-key lists resolved.
#[derive(Debug, Clone, Default)]
pub struct ExerciseRecord {
    pub id: String,
    pub author_id: Option<String>,
    pub forked_from_id: Option<String>,
    pub exercise_config_id: Option<String>,
    pub score_config_id: Option<String>,
    pub difficulty: String,
    pub configuration_type: String,
    pub solution_files_limit: Option<i64>,
    pub solution_size_limit: Option<i64>,
    pub merge_judge_logs: bool,
    pub is_broken: bool,
    pub updated_at: Option<String>,
    pub localized_text_ids: IdList,
    pub runtime_config_ids: IdList,
    pub test_ids: IdList,
    pub limits_ids: IdList,
    pub supplementary_file_ids: IdList,
    pub tags: IdList,
    pub hardware_group_ids: IdList,
    pub runtime_environment_ids: IdList,
}

fn child_lists(
    conn: &Connection,
    table: &str,
    child_column: &str,
) -> DbopsResult<HashMap<String, Vec<String>>> {
    let sql = format!(
        "SELECT j.exercise_id, j.{child_column}
         FROM {table} j
         JOIN exercise e ON e.id = j.exercise_id
         WHERE e.deleted_at IS NULL"
    );
    let rows = conn.fetch_pairs(&sql, [])?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (exercise_id, child) in rows {
        if let Some(child) = child {
            out.entry(exercise_id).or_default().push(child);
        }
    }
    Ok(out)
}

fn take_list(lists: &mut HashMap<String, Vec<String>>, exercise_id: &str) -> IdList {
    IdList::new(lists.remove(exercise_id).unwrap_or_default())
}

/// Loads every exercise without a deletion timestamp, ordered by id.
pub fn load_exercises(conn: &Connection) -> DbopsResult<Vec<ExerciseRecord>> {
    let mut exercises = conn.fetch_all(
        "SELECT id, author_id, forked_from_id, exercise_config_id, score_config_id,
                difficulty, configuration_type, solution_files_limit, solution_size_limit,
                merge_judge_logs, is_broken, updated_at
         FROM exercise
         WHERE deleted_at IS NULL
         ORDER BY id",
        [],
        |r| {
            Ok(ExerciseRecord {
                id: r.get(0)?,
                author_id: r.get(1)?,
                forked_from_id: r.get(2)?,
                exercise_config_id: r.get(3)?,
                score_config_id: r.get(4)?,
                difficulty: r.get(5)?,
                configuration_type: r.get(6)?,
                solution_files_limit: r.get(7)?,
                solution_size_limit: r.get(8)?,
                merge_judge_logs: r.get::<_, i64>(9)? != 0,
                is_broken: r.get::<_, i64>(10)? != 0,
                updated_at: r.get(11)?,
                ..ExerciseRecord::default()
            })
        },
    )?;

    let mut texts = child_lists(conn, "exercise_localized_exercise", "localized_exercise_id")?;
    let mut runtime_configs = child_lists(
        conn,
        "exercise_exercise_environment_config",
        "exercise_environment_config_id",
    )?;
    let mut tests = child_lists(conn, "exercise_exercise_test", "exercise_test_id")?;
    let mut limits = child_lists(conn, "exercise_exercise_limits", "exercise_limits_id")?;
    let mut files = child_lists(
        conn,
        "exercise_supplementary_exercise_file",
        "supplementary_exercise_file_id",
    )?;
    let mut tags = child_lists(conn, "exercise_tag", "name")?;
    let mut hardware_groups = child_lists(conn, "exercise_hardware_group", "hardware_group_id")?;
    let mut runtimes = child_lists(
        conn,
        "exercise_runtime_environment",
        "runtime_environment_id",
    )?;

    for ex in exercises.iter_mut() {
        let id = ex.id.clone();
        ex.localized_text_ids = take_list(&mut texts, &id);
        ex.runtime_config_ids = take_list(&mut runtime_configs, &id);
        ex.test_ids = take_list(&mut tests, &id);
        ex.limits_ids = take_list(&mut limits, &id);
        ex.supplementary_file_ids = take_list(&mut files, &id);
        ex.tags = take_list(&mut tags, &id);
        ex.hardware_group_ids = take_list(&mut hardware_groups, &id);
        ex.runtime_environment_ids = take_list(&mut runtimes, &id);
    }

    tracing::debug!(count = exercises.len(), "loaded exercises");
    Ok(exercises)
}
