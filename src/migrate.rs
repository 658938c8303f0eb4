//! Moves every record bound to one runtime environment to another.
//!
//! All preconditions (distinct, existing environments; a pipeline bijection)
//! are checked before a transaction is opened. The foreign-key rewrite and
//! the exercise-config rewrite then run in a single transaction which is
//! rolled back on any failure.

use crate::db::RUNTIME_FK_TABLES;
use crate::error::{Diagnostic, DbopsError, DbopsResult};
use crate::pipelines::{self, MappedPipeline, PipelineMapping};
use crate::store::{RowQuery, Store};
use crate::yaml_eq;
use rusqlite::Connection;
use serde::Serialize;
use serde_yaml_ng::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrationState {
    Idle,
    TransactionOpen,
    Committed,
    RolledBack,
}

/// Everything needed to run a migration, computed without writing.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub old_env: String,
    pub new_env: String,
    pub mapping: PipelineMapping,
    pub named: Vec<MappedPipeline>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUpdate {
    pub table: &'static str,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub run_id: String,
    pub old_env: String,
    pub new_env: String,
    pub state: MigrationState,
    pub pipelines: Vec<MappedPipeline>,
    pub tables: Vec<TableUpdate>,
    pub documents_rewritten: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl MigrationSummary {
    pub fn rows_rewritten(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Checks the migration preconditions and computes the pipeline bijection.
pub fn plan_migration(conn: &Connection, old_env: &str, new_env: &str) -> DbopsResult<MigrationPlan> {
    if old_env == new_env {
        return Err(DbopsError::SameEnvironment(old_env.to_string()));
    }
    for env in [old_env, new_env] {
        if !pipelines::environment_exists(conn, env)? {
            return Err(DbopsError::UnknownEnvironment(env.to_string()));
        }
    }

    let old = pipelines::environment_pipelines(conn, old_env)?;
    let new = pipelines::environment_pipelines(conn, new_env)?;
    let (mapping, named) = pipelines::map_pipelines(&old, &new)?;
    Ok(MigrationPlan {
        old_env: old_env.to_string(),
        new_env: new_env.to_string(),
        mapping,
        named,
    })
}

pub struct EnvironmentMigrator<'s> {
    store: &'s mut Store,
    run_id: Uuid,
    state: MigrationState,
}

impl<'s> EnvironmentMigrator<'s> {
    pub fn new(store: &'s mut Store) -> Self {
        Self {
            store,
            run_id: Uuid::new_v4(),
            state: MigrationState::Idle,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn plan(&self, old_env: &str, new_env: &str) -> DbopsResult<MigrationPlan> {
        plan_migration(self.store.conn(), old_env, new_env)
    }

    pub fn migrate(&mut self, old_env: &str, new_env: &str) -> DbopsResult<MigrationSummary> {
        let plan = self.plan(old_env, new_env)?;
        self.execute(&plan)
    }

    /// Applies a plan inside one transaction. A migrator runs at most once.
    pub fn execute(&mut self, plan: &MigrationPlan) -> DbopsResult<MigrationSummary> {
        if self.state != MigrationState::Idle {
            return Err(DbopsError::MigratorUsed(self.run_id.to_string()));
        }
        let span = tracing::info_span!(
            "migrate",
            run_id = %self.run_id,
            old = %plan.old_env,
            new = %plan.new_env
        );
        let _enter = span.enter();

        for p in &plan.named {
            tracing::info!("{} -> {}", p.old_name, p.new_name);
        }

        let mut summary = MigrationSummary {
            run_id: self.run_id.to_string(),
            old_env: plan.old_env.clone(),
            new_env: plan.new_env.clone(),
            state: MigrationState::Idle,
            pipelines: plan.named.clone(),
            tables: Vec::new(),
            documents_rewritten: 0,
            diagnostics: Vec::new(),
        };

        let tx = self.store.begin()?;
        self.state = MigrationState::TransactionOpen;

        match apply_plan(&tx, plan, &mut summary) {
            Ok(()) => match tx.commit() {
                Ok(()) => {
                    self.state = MigrationState::Committed;
                    tracing::info!(
                        rows = summary.rows_rewritten(),
                        documents = summary.documents_rewritten,
                        "migration committed"
                    );
                }
                Err(e) => {
                    self.state = MigrationState::RolledBack;
                    tracing::error!("commit failed, changes rolled back: {}", e);
                    return Err(e.into());
                }
            },
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    tracing::error!("rollback failed: {}", rb);
                }
                self.state = MigrationState::RolledBack;
                tracing::error!("migration rolled back: {}", e);
                return Err(e);
            }
        }

        summary.state = self.state;
        Ok(summary)
    }
}

fn apply_plan(
    conn: &Connection,
    plan: &MigrationPlan,
    summary: &mut MigrationSummary,
) -> DbopsResult<()> {
    for table in RUNTIME_FK_TABLES {
        let rows = conn.update_where(table, "runtime_environment_id", &plan.new_env, &plan.old_env)?;
        tracing::info!(table, rows, "foreign keys rewritten");
        summary.tables.push(TableUpdate { table, rows });
    }

    let configs = conn.fetch_pairs("SELECT id, config FROM exercise_config ORDER BY id", [])?;
    for (config_id, text) in configs {
        let Some(text) = text else {
            continue;
        };
        let doc = match yaml_eq::parse(&text) {
            Ok(v) => v,
            Err(e) => {
                let d = Diagnostic::new(&config_id, "exercise-config", e.to_string());
                tracing::warn!(config = %config_id, "skipping unparsable config: {}", e);
                summary.diagnostics.push(d);
                continue;
            }
        };

        let Some(rewritten) = rewrite_config(&config_id, &doc, plan)? else {
            continue;
        };
        let serialized =
            serde_yaml_ng::to_string(&rewritten).map_err(|e| DbopsError::Serialize {
                config_id: config_id.clone(),
                message: e.to_string(),
            })?;
        conn.execute(
            "UPDATE exercise_config SET config = ? WHERE id = ?",
            (&serialized, &config_id),
        )?;
        summary.documents_rewritten += 1;
    }
    tracing::info!(documents = summary.documents_rewritten, "exercise configs rewritten");
    Ok(())
}

fn sequence_contains(seq: &[Value], needle: &str) -> bool {
    seq.iter().any(|v| v.as_str() == Some(needle))
}

fn malformed(config_id: &str, field: &str) -> DbopsError {
    DbopsError::MalformedConfig {
        config_id: config_id.to_string(),
        field: field.to_string(),
    }
}

/// Rewrites one exercise-config document for the plan. Returns `None` when
/// the document does not need to change.
pub fn rewrite_config(
    config_id: &str,
    doc: &Value,
    plan: &MigrationPlan,
) -> DbopsResult<Option<Value>> {
    let old_env = plan.old_env.as_str();
    let new_env = plan.new_env.as_str();

    let Some(environments) = doc.get("environments").and_then(Value::as_sequence) else {
        return Ok(None);
    };
    if !sequence_contains(environments, old_env) || sequence_contains(environments, new_env) {
        return Ok(None);
    }

    let mut out = doc.clone();
    if let Some(seq) = out.get_mut("environments").and_then(Value::as_sequence_mut) {
        for env in seq.iter_mut() {
            if env.as_str() == Some(old_env) {
                *env = Value::String(new_env.to_string());
            }
        }
    }

    let tests = match out.get_mut("tests") {
        None | Some(Value::Null) => None,
        Some(Value::Sequence(tests)) => Some(tests),
        Some(_) => return Err(malformed(config_id, "tests")),
    };
    for test in tests.into_iter().flatten() {
        let Some(test_envs) = test.get_mut("environments") else {
            continue;
        };
        let Some(test_envs) = test_envs.as_mapping_mut() else {
            return Err(malformed(config_id, "tests.environments"));
        };
        if !test_envs.contains_key(old_env) || test_envs.contains_key(new_env) {
            continue;
        }
        let Some(mut block) = test_envs.remove(old_env) else {
            continue;
        };
        remap_block_pipelines(config_id, &mut block, &plan.mapping)?;
        test_envs.insert(Value::String(new_env.to_string()), block);
    }

    Ok(if out != *doc { Some(out) } else { None })
}

fn remap_block_pipelines(
    config_id: &str,
    block: &mut Value,
    mapping: &PipelineMapping,
) -> DbopsResult<()> {
    let Some(block) = block.as_mapping_mut() else {
        return Ok(());
    };
    let pipelines = match block.get_mut("pipelines") {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Sequence(p)) => p,
        Some(_) => return Err(malformed(config_id, "pipelines")),
    };
    for pipeline in pipelines.iter_mut() {
        let Some(entry) = pipeline.as_mapping_mut() else {
            return Err(malformed(config_id, "pipelines"));
        };
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            return Err(malformed(config_id, "pipelines.name"));
        };
        let Some(mapped) = mapping.get(name) else {
            return Err(DbopsError::UnmappedPipeline {
                config_id: config_id.to_string(),
                pipeline: name.to_string(),
            });
        };
        let mapped = Value::String(mapped.to_string());
        entry.insert(Value::String("name".to_string()), mapped);
    }
    Ok(())
}
