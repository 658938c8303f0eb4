mod test_support;

use dbops::migrate::{EnvironmentMigrator, MigrationState};
use dbops::{DbopsError, MatchError, Store};
use test_support::{dump_table, seed_runtimes, Workspace};

const TOUCHED_TABLES: [&str; 7] = [
    "exercise_runtime_environment",
    "exercise_environment_config",
    "exercise_limits",
    "assignment_runtime_environment",
    "assignment_disabled_runtime_environments",
    "solution",
    "exercise_config",
];

fn snapshot_tables(ws: &Workspace) -> Vec<Vec<String>> {
    let conn = ws.conn();
    TOUCHED_TABLES.iter().map(|t| dump_table(&conn, t)).collect()
}

fn config_doc(ws: &Workspace, id: &str) -> serde_yaml_ng::Value {
    let text: String = ws
        .conn()
        .query_row("SELECT config FROM exercise_config WHERE id = ?", [id], |r| r.get(0))
        .expect("config row");
    serde_yaml_ng::from_str(&text).expect("config yaml")
}

fn count(ws: &Workspace, sql: &str) -> i64 {
    ws.conn().query_row(sql, [], |r| r.get(0)).expect("count")
}

#[test]
fn migrates_foreign_keys_and_config_documents() {
    let ws = Workspace::new();
    seed_runtimes(&ws.conn());
    let cfg2_before = dump_table(&ws.conn(), "exercise_config")
        .into_iter()
        .find(|r| r.contains("cfg2"))
        .expect("cfg2 row");

    let mut store = Store::open(&ws.db_path).expect("open store");
    let mut migrator = EnvironmentMigrator::new(&mut store);
    let summary = migrator.migrate("py2", "py3").expect("migrate");
    assert_eq!(migrator.state(), MigrationState::Committed);
    assert_eq!(summary.state, MigrationState::Committed);
    assert_eq!(summary.documents_rewritten, 1);
    assert!(summary.diagnostics.is_empty());

    let rows: Vec<(&str, usize)> = summary.tables.iter().map(|t| (t.table, t.rows)).collect();
    assert_eq!(
        rows,
        vec![
            ("exercise_runtime_environment", 1),
            ("exercise_environment_config", 1),
            ("exercise_limits", 1),
            ("assignment_runtime_environment", 1),
            ("assignment_disabled_runtime_environments", 1),
            ("solution", 2),
        ]
    );
    let mapped: Vec<(&str, &str)> = summary
        .pipelines
        .iter()
        .map(|p| (p.old_id.as_str(), p.new_id.as_str()))
        .collect();
    assert_eq!(mapped, vec![("p-compile", "q-compile"), ("p-run", "q-run")]);
    drop(migrator);
    drop(store);

    for table in TOUCHED_TABLES.iter().filter(|t| **t != "exercise_config") {
        let left = count(
            &ws,
            &format!("SELECT COUNT(*) FROM {table} WHERE runtime_environment_id = 'py2'"),
        );
        assert_eq!(left, 0, "{table} still references py2");
    }
    assert_eq!(
        count(&ws, "SELECT COUNT(*) FROM solution WHERE runtime_environment_id = 'py3'"),
        2
    );

    let doc = config_doc(&ws, "cfg1");
    let envs: Vec<&str> = doc["environments"]
        .as_sequence()
        .expect("environments")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(envs, vec!["py3", "c"]);
    let test_envs = doc["tests"][0]["environments"].as_mapping().expect("test environments");
    assert!(!test_envs.contains_key("py2"));
    let pipelines: Vec<&str> = doc["tests"][0]["environments"]["py3"]["pipelines"]
        .as_sequence()
        .expect("pipelines")
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert_eq!(pipelines, vec!["q-compile", "q-run"]);
    assert_eq!(
        doc["tests"][0]["environments"]["py3"]["pipelines"][0]["variables"][0]["value"][0].as_str(),
        Some("main.py")
    );

    let cfg2_after = dump_table(&ws.conn(), "exercise_config")
        .into_iter()
        .find(|r| r.contains("cfg2"))
        .expect("cfg2 row");
    assert_eq!(cfg2_before, cfg2_after, "unrelated document must not be rewritten");
}

#[test]
fn second_run_is_a_no_op() {
    let ws = Workspace::new();
    seed_runtimes(&ws.conn());
    let mut store = Store::open(&ws.db_path).expect("open store");

    EnvironmentMigrator::new(&mut store)
        .migrate("py2", "py3")
        .expect("first run");
    drop(store);
    let after_first = snapshot_tables(&ws);

    let mut store = Store::open(&ws.db_path).expect("reopen store");
    let summary = EnvironmentMigrator::new(&mut store)
        .migrate("py2", "py3")
        .expect("second run");
    assert_eq!(summary.rows_rewritten(), 0);
    assert_eq!(summary.documents_rewritten, 0);
    drop(store);

    assert_eq!(snapshot_tables(&ws), after_first);
}

#[test]
fn unmapped_pipeline_rolls_everything_back() {
    let ws = Workspace::new();
    let conn = ws.conn();
    seed_runtimes(&conn);
    conn.execute(
        "INSERT INTO exercise_config(id, config) VALUES ('cfg3', ?)",
        ["environments: [py2]\ntests:\n  - name: t1\n    environments:\n      py2:\n        pipelines:\n          - name: p-retired\n"],
    )
    .expect("seed cfg3");
    drop(conn);
    let before = snapshot_tables(&ws);

    let mut store = Store::open(&ws.db_path).expect("open store");
    let mut migrator = EnvironmentMigrator::new(&mut store);
    let err = migrator.migrate("py2", "py3").expect_err("must abort");
    match err {
        DbopsError::UnmappedPipeline { config_id, pipeline } => {
            assert_eq!(config_id, "cfg3");
            assert_eq!(pipeline, "p-retired");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(migrator.state(), MigrationState::RolledBack);
    drop(migrator);
    drop(store);

    assert_eq!(snapshot_tables(&ws), before);
}

#[test]
fn preconditions_fail_without_opening_a_transaction() {
    let ws = Workspace::new();
    seed_runtimes(&ws.conn());
    let before = snapshot_tables(&ws);
    let mut store = Store::open(&ws.db_path).expect("open store");

    let mut migrator = EnvironmentMigrator::new(&mut store);
    assert!(matches!(
        migrator.migrate("py2", "py2"),
        Err(DbopsError::SameEnvironment(env)) if env == "py2"
    ));
    assert!(matches!(
        migrator.migrate("py2", "ruby"),
        Err(DbopsError::UnknownEnvironment(env)) if env == "ruby"
    ));
    assert!(matches!(
        migrator.migrate("c", "py3"),
        Err(DbopsError::Match(MatchError::SizeMismatch { old: 1, new: 2 }))
    ));
    assert_eq!(migrator.state(), MigrationState::Idle);
    drop(migrator);
    drop(store);

    assert_eq!(snapshot_tables(&ws), before);
}

#[test]
fn unparsable_documents_are_skipped_with_a_diagnostic() {
    let ws = Workspace::new();
    let conn = ws.conn();
    seed_runtimes(&conn);
    conn.execute(
        "INSERT INTO exercise_config(id, config) VALUES ('broken', 'environments: [py2')",
        [],
    )
    .expect("seed broken config");
    drop(conn);

    let mut store = Store::open(&ws.db_path).expect("open store");
    let summary = EnvironmentMigrator::new(&mut store)
        .migrate("py2", "py3")
        .expect("migrate");
    assert_eq!(summary.documents_rewritten, 1);
    assert_eq!(summary.diagnostics.len(), 1);
    assert_eq!(summary.diagnostics[0].subject, "broken");
}

#[test]
fn migrator_runs_only_once() {
    let ws = Workspace::new();
    seed_runtimes(&ws.conn());
    let mut store = Store::open(&ws.db_path).expect("open store");
    let mut migrator = EnvironmentMigrator::new(&mut store);
    let plan = migrator.plan("py2", "py3").expect("plan");
    migrator.execute(&plan).expect("first execute");
    assert!(matches!(
        migrator.execute(&plan),
        Err(DbopsError::MigratorUsed(_))
    ));
}
