#![allow(dead_code)]

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("store.sqlite3");
        let conn = dbops::db::open_db(&db_path).expect("open store");
        drop(conn);
        Self { dir, db_path }
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.db_path).expect("open sqlite")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `dbops.toml` in the workspace and returns its path.
    pub fn write_config(&self, body: &str) -> PathBuf {
        let p = self.dir.path().join("dbops.toml");
        let text = format!("database = {:?}\n{}", self.db_path.to_string_lossy(), body);
        std::fs::write(&p, text).expect("write config");
        p
    }

    pub fn run(&self, args: &[&str]) -> Output {
        let config = self.dir.path().join("dbops.toml");
        Command::new(env!("CARGO_BIN_EXE_dbops"))
            .arg("--config")
            .arg(&config)
            .arg("--database")
            .arg(&self.db_path)
            .args(args)
            .env_remove("DBOPS_DATABASE")
            .output()
            .expect("spawn dbops")
    }
}

pub fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

pub fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// Two runtime environments whose pipelines match by boolean fingerprint:
/// py2 {p-compile, p-run} and py3 {q-run, q-compile}. Exercise `e1` runs on
/// py2 and its config references both py2 pipelines; `e2` runs on c only.
pub fn seed_runtimes(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO runtime_environment(id, long_name) VALUES
            ('py2', 'Python 2'), ('py3', 'Python 3'), ('c', 'C');
         INSERT INTO pipeline(id, name) VALUES
            ('p-compile', 'Python 2 compilation'),
            ('p-run', 'Python 2 execution'),
            ('q-run', 'Python 3 execution'),
            ('q-compile', 'Python 3 compilation'),
            ('c-run', 'C execution');
         INSERT INTO pipeline_runtime_environment VALUES
            ('p-compile', 'py2'), ('p-run', 'py2'),
            ('q-run', 'py3'), ('q-compile', 'py3'),
            ('c-run', 'c');
         INSERT INTO pipeline_parameter VALUES
            ('pp1', 'p-compile', 'isCompilationPipeline', 'boolean', 1, NULL),
            ('pp2', 'p-compile', 'isExecutionPipeline', 'boolean', 0, NULL),
            ('pp3', 'p-run', 'isCompilationPipeline', 'boolean', 0, NULL),
            ('pp4', 'p-run', 'isExecutionPipeline', 'boolean', 1, NULL),
            ('pp5', 'p-run', 'producesStdout', 'string', NULL, 'true'),
            ('qp1', 'q-run', 'isCompilationPipeline', 'boolean', 0, NULL),
            ('qp2', 'q-run', 'isExecutionPipeline', 'boolean', 1, NULL),
            ('qp3', 'q-compile', 'isCompilationPipeline', 'boolean', 1, NULL),
            ('qp4', 'q-compile', 'isExecutionPipeline', 'boolean', 0, NULL);

         INSERT INTO exercise_config(id, config) VALUES
            ('cfg1', 'environments: [py2, c]
tests:
  - name: t1
    environments:
      py2:
        pipelines:
          - name: p-compile
            variables: [{name: source-files, type: \"file[]\", value: [main.py]}]
          - name: p-run
            variables: []
      c:
        pipelines:
          - name: c-run
            variables: []
'),
            ('cfg2', 'environments: [c]
tests:
  - name: t1
    environments:
      c: {pipelines: [{name: c-run, variables: []}]}
');
         INSERT INTO exercise(id, exercise_config_id) VALUES ('e1', 'cfg1'), ('e2', 'cfg2');
         INSERT INTO exercise_runtime_environment VALUES ('e1', 'py2'), ('e1', 'c'), ('e2', 'c');
         INSERT INTO exercise_environment_config(id, runtime_environment_id, variables_table) VALUES
            ('ec1', 'py2', '[]'), ('ec2', 'c', '[]');
         INSERT INTO exercise_exercise_environment_config VALUES ('e1', 'ec1'), ('e1', 'ec2');
         INSERT INTO exercise_limits(id, runtime_environment_id, hardware_group_id, limits) VALUES
            ('l1', 'py2', 'group1', 'wall-time: 2'), ('l2', 'c', 'group1', 'wall-time: 1');
         INSERT INTO assignment(id, exercise_id) VALUES ('a1', 'e1');
         INSERT INTO assignment_runtime_environment VALUES ('a1', 'py2');
         INSERT INTO assignment_disabled_runtime_environments VALUES ('a1', 'py2');
         INSERT INTO solution(id, runtime_environment_id) VALUES
            ('s1', 'py2'), ('s2', 'py2'), ('s3', 'c');",
    )
    .expect("seed runtimes");
}

/// `e1` and its fork `e2` share config, runtime and tests; their score
/// configs differ only in the document.
pub fn seed_forks(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO user(id, first_name, last_name) VALUES ('u1', 'Ada', 'Lovelace');
         INSERT INTO \"group\"(id, archived_at, deleted_at) VALUES
            ('g1', NULL, NULL), ('g2', '2022-01-01 00:00:00', NULL), ('g3', NULL, NULL);
         INSERT INTO exercise_config(id, config) VALUES
            ('cfg1', 'environments: [py3]
tests: [{name: t1, environments: {py3: {pipelines: [{name: q-run}]}}}]
'),
            ('cfg2', '# forked copy
tests:
  - environments:
      py3:
        pipelines:
          - name: q-run
    name: t1
environments:
  - py3
');
         INSERT INTO exercise_score_config(id, calculator, config) VALUES
            ('sc1', 'weighted', 'testWeights: {t1: 100}'),
            ('sc2', 'weighted', 'testWeights: {t1: 50}');
         INSERT INTO exercise(id, author_id, forked_from_id, exercise_config_id, score_config_id,
                              difficulty, configuration_type, updated_at) VALUES
            ('e1', 'u1', NULL, 'cfg1', 'sc1', 'easy', 'simpleExerciseConfig', '2023-01-01 10:00:00'),
            ('e2', 'u1', 'e1', 'cfg2', 'sc2', 'easy', 'simpleExerciseConfig', '2023-02-03T04:05:06'),
            ('e3', 'u1', 'gone', 'cfg1', 'sc1', 'easy', 'simpleExerciseConfig', NULL);
         INSERT INTO exercise_group VALUES ('e2', 'g1'), ('e2', 'g2'), ('e2', 'g3');
         INSERT INTO localized_exercise(id, locale, name, description) VALUES
            ('lt1', 'en', 'Sum', 'Add numbers'),
            ('lt2', 'en', 'Sum', 'Add numbers');
         INSERT INTO exercise_localized_exercise VALUES ('e1', 'lt1'), ('e2', 'lt2');
         INSERT INTO runtime_environment(id) VALUES ('py3');
         INSERT INTO exercise_runtime_environment VALUES ('e1', 'py3'), ('e2', 'py3');
         INSERT INTO hardware_group(id) VALUES ('group1');
         INSERT INTO exercise_hardware_group VALUES ('e1', 'group1'), ('e2', 'group1');
         INSERT INTO exercise_environment_config(id, runtime_environment_id, variables_table) VALUES
            ('ec1', 'py3', '[{name: source-files, type: \"file[]\", value: [\"*.py\"]}]'),
            ('ec2', 'py3', '- {type: \"file[]\", value: [\"*.py\"], name: source-files}');
         INSERT INTO exercise_exercise_environment_config VALUES ('e1', 'ec1'), ('e2', 'ec2');
         INSERT INTO exercise_test(id, name, description) VALUES
            ('t1', 'basic', 'small input'), ('t2', 'large', 'big input'),
            ('t3', 'large', 'big input'), ('t4', 'basic', 'small input');
         INSERT INTO exercise_exercise_test VALUES
            ('e1', 't1'), ('e1', 't2'), ('e2', 't3'), ('e2', 't4');
         INSERT INTO uploaded_file(id, name, hash_name) VALUES
            ('f1', 'input.txt', 'abc'), ('f2', 'copy-of-input.txt', 'abc');
         INSERT INTO exercise_supplementary_exercise_file VALUES ('e1', 'f1'), ('e2', 'f2');
         INSERT INTO exercise_limits(id, runtime_environment_id, hardware_group_id, limits) VALUES
            ('l1', 'py3', 'group1', 'wall-time: 2.0'), ('l2', 'py3', 'group1', 'wall-time: 2.0');
         INSERT INTO exercise_exercise_limits VALUES ('e1', 'l1'), ('e2', 'l2');",
    )
    .expect("seed forks");
}

/// Every row of `table`, each rendered as a `|`-joined string, sorted.
pub fn dump_table(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM \"{table}\""))
        .expect("prepare dump");
    let columns = stmt.column_count();
    let mut rows: Vec<String> = stmt
        .query_map([], |r| {
            let mut cells = Vec::with_capacity(columns);
            for i in 0..columns {
                let v: rusqlite::types::Value = r.get(i)?;
                cells.push(format!("{:?}", v));
            }
            Ok(cells.join("|"))
        })
        .expect("query dump")
        .collect::<Result<_, _>>()
        .expect("collect dump");
    rows.sort();
    rows
}
